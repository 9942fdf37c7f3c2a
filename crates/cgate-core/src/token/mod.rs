//! Self-refreshing cache of the challenge token the edge requires in the
//! `x-is-human` header.
//!
//! A background task refreshes on a ticker and suspends itself once the
//! gateway has been idle for a while; the next token demand wakes it. A
//! token older than the hard-expiry bound is never served without an inline
//! refresh attempt first.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::GatewayError;

pub mod source;

pub use source::{ChallengeSource, HttpChallengeSource, RefreshError};

/// Age past which a cached token must not be served without a synchronous
/// refresh attempt. Kept above the default refresh interval (25 s) so the
/// steady-state refresher always renews first.
const HARD_EXPIRY: Duration = Duration::from_secs(28);
/// Age past which `is_healthy` reports stale.
const HEALTHY_MAX_AGE: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub refresh_interval: Duration,
    pub idle_timeout: Duration,
}

struct TokenState {
    token: String,
    refreshed_at: Option<Instant>,
    refresher_active: bool,
    last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    total: AtomicI64,
    success: AtomicI64,
    failed: AtomicI64,
    cache_hits: AtomicI64,
}

/// Point-in-time snapshot for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenStats {
    pub total_requests: i64,
    pub success_requests: i64,
    pub failed_requests: i64,
    pub cache_hits: i64,
    pub token_age_secs: Option<u64>,
    pub idle_secs: u64,
    pub refresher_active: bool,
    pub has_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct TokenManager {
    source: Arc<dyn ChallengeSource>,
    config: TokenManagerConfig,
    state: RwLock<TokenState>,
    /// Millisecond offset from `base`, so demand tracking stays on the read
    /// path without taking the write lock.
    last_access_ms: AtomicI64,
    base: Instant,
    counters: Counters,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
}

impl TokenManager {
    pub fn new(source: Arc<dyn ChallengeSource>, config: TokenManagerConfig) -> Arc<Self> {
        // Single-slot wake channel: concurrent demands collapse into at most
        // one queued signal.
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Arc::new(Self {
            source,
            config,
            state: RwLock::new(TokenState {
                token: String::new(),
                refreshed_at: None,
                refresher_active: false,
                last_error: None,
            }),
            last_access_ms: AtomicI64::new(0),
            base: Instant::now(),
            counters: Counters::default(),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            cancel: CancellationToken::new(),
        })
    }

    /// Performs the initial blocking refresh and spawns the background
    /// refresher. A failed first refresh is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        self.touch_access();
        {
            let mut state = self.state.write().await;
            self.refresh_locked(&mut state)
                .await
                .map_err(|err| GatewayError::Init(err.to_string()))?;
        }

        let wake_rx = {
            let mut guard = self
                .wake_rx
                .lock()
                .map_err(|_| GatewayError::Init("wake receiver lock poisoned".to_string()))?;
            guard
                .take()
                .ok_or_else(|| GatewayError::Init("token manager already started".to_string()))?
        };
        tokio::spawn(self.clone().refresh_loop(wake_rx));

        info!(
            event = "token.started",
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs()
        );
        Ok(())
    }

    pub fn stop(&self) {
        info!(event = "token.stopped");
        self.cancel.cancel();
    }

    /// Returns the cached token, refreshing inline when it has crossed the
    /// hard-expiry bound.
    pub async fn get_token(&self) -> Result<String, GatewayError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.touch_access();

        {
            let state = self.state.read().await;
            if !state.refresher_active && self.wake_tx.try_send(()).is_ok() {
                info!(event = "token.wake_signal");
            }
            if !token_expired(&state) {
                return self.serve_cached(&state);
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if token_expired(&state) {
            warn!(
                event = "token.forced_refresh",
                age_secs = token_age(&state).map(|age| age.as_secs())
            );
            if let Err(err) = self.refresh_locked(&mut state).await {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::ExpiredRefresh(err.to_string()));
            }
        }
        self.serve_cached(&state)
    }

    pub async fn is_healthy(&self) -> bool {
        let state = self.state.read().await;
        !state.token.is_empty()
            && token_age(&state).is_some_and(|age| age < HEALTHY_MAX_AGE)
    }

    pub async fn stats(&self) -> TokenStats {
        let state = self.state.read().await;
        TokenStats {
            total_requests: self.counters.total.load(Ordering::Relaxed),
            success_requests: self.counters.success.load(Ordering::Relaxed),
            failed_requests: self.counters.failed.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            token_age_secs: token_age(&state).map(|age| age.as_secs()),
            idle_secs: self.idle_for().as_secs(),
            refresher_active: state.refresher_active,
            has_token: !state.token.is_empty(),
            last_error: state.last_error.clone(),
        }
    }

    fn serve_cached(&self, state: &TokenState) -> Result<String, GatewayError> {
        if state.token.is_empty() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::NotInitialized);
        }
        self.counters.success.fetch_add(1, Ordering::Relaxed);
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        Ok(state.token.clone())
    }

    /// Refreshes with retries while holding the write lock. The cached token
    /// keeps serving readers that do not hit hard expiry, so blocking writers
    /// for the duration of the HTTP round-trips is acceptable.
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<(), RefreshError> {
        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt - 1))).await;
            }
            match self.source.fetch().await {
                Ok(token) => {
                    info!(event = "token.refreshed", attempt, token_len = token.len());
                    state.token = token;
                    state.refreshed_at = Some(Instant::now());
                    state.last_error = None;
                    return Ok(());
                }
                Err(err) => {
                    warn!(event = "token.refresh_attempt_failed", attempt, error = %err);
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.expect("at least one refresh attempt");
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        state.last_error = Some(err.to_string());
        Err(err)
    }

    async fn refresh_loop(self: Arc<Self>, mut wake_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        self.state.write().await.refresher_active = true;
        info!(event = "token.refresher_started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(event = "token.refresher_exited");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let idle = self.idle_for();
            if idle > self.config.idle_timeout {
                self.state.write().await.refresher_active = false;
                info!(event = "token.suspended", idle_secs = idle.as_secs());

                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!(event = "token.refresher_exited");
                        return;
                    }
                    _ = wake_rx.recv() => {
                        self.state.write().await.refresher_active = true;
                        info!(event = "token.resumed");
                    }
                }
                continue;
            }

            let mut state = self.state.write().await;
            if let Err(err) = self.refresh_locked(&mut state).await {
                warn!(event = "token.periodic_refresh_failed", error = %err);
            }
        }
    }

    fn touch_access(&self) {
        self.last_access_ms
            .store(self.base.elapsed().as_millis() as i64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now_ms = self.base.elapsed().as_millis() as i64;
        let last_ms = self.last_access_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_ms.saturating_sub(last_ms).max(0) as u64)
    }
}

fn token_age(state: &TokenState) -> Option<Duration> {
    state.refreshed_at.map(|at| at.elapsed())
}

fn token_expired(state: &TokenState) -> bool {
    token_age(state).is_none_or(|age| age > HARD_EXPIRY)
}

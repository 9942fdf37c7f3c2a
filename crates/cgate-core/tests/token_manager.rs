use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use cgate_core::error::GatewayError;
use cgate_core::token::{ChallengeSource, RefreshError, TokenManager, TokenManagerConfig};

struct FakeSource {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ChallengeSource for FakeSource {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, RefreshError>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                Err(RefreshError::ProcessRejected)
            } else {
                Ok(format!("token-{n}"))
            }
        })
    }
}

fn config(refresh_secs: u64, idle_secs: u64) -> TokenManagerConfig {
    TokenManagerConfig {
        refresh_interval: Duration::from_secs(refresh_secs),
        idle_timeout: Duration::from_secs(idle_secs),
    }
}

#[tokio::test(start_paused = true)]
async fn start_refreshes_once_and_serves_the_cached_token() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(3600, 3600));

    manager.start().await.unwrap();
    assert_eq!(source.calls(), 1);

    assert_eq!(manager.get_token().await.unwrap(), "token-1");
    assert_eq!(manager.get_token().await.unwrap(), "token-1");
    assert_eq!(source.calls(), 1);

    let stats = manager.stats().await;
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.success_requests, 2);
    assert_eq!(stats.cache_hits, 2);
    assert!(stats.has_token);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_bootstrap_is_fatal_after_retries() {
    let source = FakeSource::new();
    source.set_fail(true);
    let manager = TokenManager::new(source.clone(), config(3600, 3600));

    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, GatewayError::Init(_)));
    assert_eq!(source.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn background_refresher_renews_on_the_ticker() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(25, 3600));
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.calls(), 2);
    assert_eq!(manager.get_token().await.unwrap(), "token-2");

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn idle_refresher_suspends_and_demand_wakes_it() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(25, 10));
    manager.start().await.unwrap();

    // First tick (t=25s) sees 25s of idleness and suspends without refreshing.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!manager.stats().await.refresher_active);
    assert_eq!(source.calls(), 1);

    // Suspended means no refresh traffic at all.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(source.calls(), 1);

    // Demand wakes the refresher; the stale token forces an inline refresh.
    assert_eq!(manager.get_token().await.unwrap(), "token-2");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(manager.stats().await.refresher_active);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn concurrent_demands_while_suspended_queue_at_most_one_wake() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(25, 10));
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!manager.stats().await.refresher_active);

    // Three demands: the first refreshes inline (hard expiry), all three
    // collapse into a single queued wake signal.
    assert_eq!(manager.get_token().await.unwrap(), "token-2");
    assert_eq!(manager.get_token().await.unwrap(), "token-2");
    assert_eq!(manager.get_token().await.unwrap(), "token-2");
    assert_eq!(source.calls(), 2);

    // The refresher resumes once, goes idle again and re-suspends; a second
    // queued wake would resume it immediately.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!manager.stats().await.refresher_active);
    assert_eq!(source.calls(), 2);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn token_past_hard_expiry_is_refreshed_inline() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(3600, 3600));
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(manager.get_token().await.unwrap(), "token-2");
    assert_eq!(source.calls(), 2);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn token_within_hard_expiry_is_served_without_refresh() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(3600, 3600));
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(manager.get_token().await.unwrap(), "token-1");
    assert_eq!(source.calls(), 1);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_forced_refresh_never_serves_a_stale_token() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(3600, 3600));
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(29)).await;
    source.set_fail(true);
    let err = manager.get_token().await.unwrap_err();
    assert!(matches!(err, GatewayError::ExpiredRefresh(_)));
    assert!(manager.stats().await.failed_requests > 0);
    assert!(manager.stats().await.last_error.is_some());

    // Recovery on the next demand once the source works again.
    source.set_fail(false);
    let token = manager.get_token().await.unwrap();
    assert!(token.starts_with("token-"));
    assert_ne!(token, "token-1");

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn health_tracks_token_age() {
    let source = FakeSource::new();
    let manager = TokenManager::new(source.clone(), config(3600, 3600));
    manager.start().await.unwrap();
    assert!(manager.is_healthy().await);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!manager.is_healthy().await);

    manager.stop();
}

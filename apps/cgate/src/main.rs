use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cgate_common::{
    DEFAULT_JS_URL, DEFAULT_PROCESS_URL, DEFAULT_SYSTEM_PROMPT, GatewayConfig, parse_duration,
};
use cgate_core::token::{HttpChallengeSource, TokenManagerConfig};
use cgate_core::{ChatService, MessageConverter, TokenManager, client};
use cgate_router::{AuthSettings, GatewayState};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cgate",
    version,
    about = "OpenAI-compatible gateway in front of the Cursor web chat API"
)]
struct CliArgs {
    /// Bind host.
    #[arg(long, env = "CGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port.
    #[arg(long, env = "CGATE_PORT", default_value_t = 5680)]
    port: u16,

    /// URL of the obfuscated challenge script.
    #[arg(long, env = "JS_URL", default_value = DEFAULT_JS_URL)]
    js_url: String,

    /// External challenge de-obfuscator endpoint.
    #[arg(long, env = "PROCESS_URL", default_value = DEFAULT_PROCESS_URL)]
    process_url: String,

    /// Prompt folded into the first user message of every request.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,

    /// Challenge refresh cadence, as seconds or <n>(s|m|h).
    #[arg(long, env = "REFRESH_INTERVAL", default_value = "25s", value_parser = parse_duration)]
    refresh_interval: Duration,

    /// Idle time before the background refresher suspends.
    #[arg(long, env = "IDLE_TIMEOUT", default_value = "10m", value_parser = parse_duration)]
    idle_timeout: Duration,

    /// Translate OpenAI tool declarations into prompt injection.
    #[arg(long, env = "ENABLE_FUNCTION_CALLING", default_value_t = false)]
    enable_function_calling: bool,

    /// Require a bearer API key on /v1 endpoints.
    #[arg(long, env = "AUTH_ENABLED", default_value_t = false)]
    auth_enabled: bool,

    /// Comma-separated list of accepted API keys.
    #[arg(long, env = "API_KEYS", value_delimiter = ',', default_value = "")]
    api_keys: Vec<String>,
}

impl CliArgs {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            js_url: self.js_url,
            process_url: self.process_url,
            system_prompt: self.system_prompt,
            refresh_interval: self.refresh_interval,
            idle_timeout: self.idle_timeout,
            enable_function_calling: self.enable_function_calling,
            auth_enabled: self.auth_enabled,
            api_keys: self
                .api_keys
                .into_iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CliArgs::parse().into_config();

    if config.auth_enabled && config.api_keys.is_empty() {
        tracing::warn!(event = "config.auth_without_keys");
    }
    info!(
        event = "startup",
        host = %config.host,
        port = config.port,
        process_url = %config.process_url,
        refresh_interval_secs = config.refresh_interval.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        function_calling = config.enable_function_calling,
        auth_enabled = config.auth_enabled
    );

    let challenge_client = client::challenge_client().context("build challenge client")?;
    let source = Arc::new(HttpChallengeSource::new(
        challenge_client,
        config.js_url.clone(),
        config.process_url.clone(),
    ));
    let manager = TokenManager::new(
        source,
        TokenManagerConfig {
            refresh_interval: config.refresh_interval,
            idle_timeout: config.idle_timeout,
        },
    );
    manager
        .start()
        .await
        .context("challenge token bootstrap")?;

    let chat_client = client::chat_client().context("build chat client")?;
    let converter = MessageConverter::new(&config.system_prompt, config.enable_function_calling);
    let chat = Arc::new(ChatService::new(manager.clone(), converter, chat_client));

    let state = GatewayState {
        chat,
        manager: manager.clone(),
        default_model: "anthropic/claude-opus-4.1".to_string(),
        auth: AuthSettings {
            enabled: config.auth_enabled,
            keys: Arc::new(config.api_keys.iter().cloned().collect::<HashSet<_>>()),
        },
    };
    let app = cgate_router::gateway_router(state);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop();
    info!(event = "shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(event = "signal.failed", error = %err);
    }
}

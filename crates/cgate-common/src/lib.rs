use std::time::Duration;

pub mod duration;

pub use duration::{DurationParseError, parse_duration};

pub const DEFAULT_JS_URL: &str = "https://cursor.com/149e9513-01fa-4fb0-aad4-566afd725d1b/2d206a39-8ed7-437e-a3be-862e0f06eea3/a-4-a/c.js?i=0&v=3&h=cursor.com";
pub const DEFAULT_PROCESS_URL: &str = "http://localhost:3000/api/process";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Final, merged runtime configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults (clap applies CLI/ENV precedence per
/// field, the defaults live on the arg definitions).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// URL of the obfuscated challenge script on the upstream edge.
    pub js_url: String,
    /// External de-obfuscator endpoint that turns the script into a token.
    pub process_url: String,
    /// Folded into the first user message of every upstream request.
    pub system_prompt: String,
    /// Background challenge-token refresh cadence.
    pub refresh_interval: Duration,
    /// No token demand for this long suspends the background refresher.
    pub idle_timeout: Duration,
    /// Gate for the tool-injection behavior of the translator.
    pub enable_function_calling: bool,
    pub auth_enabled: bool,
    /// Accepted bearer keys. Empty with auth enabled rejects everything.
    pub api_keys: Vec<String>,
}

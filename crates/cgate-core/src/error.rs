pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("challenge token bootstrap failed: {0}")]
    Init(String),
    #[error("challenge token not initialized")]
    NotInitialized,
    #[error("challenge token expired and refresh failed: {0}")]
    ExpiredRefresh(String),
    #[error("upstream returned HTTP {0}")]
    UpstreamHttp(u16),
    #[error("upstream request failed: {0}")]
    UpstreamIo(String),
    #[error("serialization failed: {0}")]
    Marshal(#[from] serde_json::Error),
    /// The inbound request went away. Never surfaced to a client.
    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::UpstreamHttp(_) => 502,
            _ => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Init(_) => "init_error",
            GatewayError::NotInitialized => "not_initialized",
            GatewayError::ExpiredRefresh(_) => "expired_refresh",
            GatewayError::UpstreamHttp(_) => "upstream_http_error",
            GatewayError::UpstreamIo(_) => "upstream_io_error",
            GatewayError::Marshal(_) => "marshal_error",
            GatewayError::Cancelled => "cancelled",
        }
    }
}

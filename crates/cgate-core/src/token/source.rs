use std::future::Future;
use std::pin::Pin;

use cgate_protocol::cursor::ProcessResponse;
use http::header::{CONTENT_TYPE, REFERER};
use wreq::Client;

/// Referer the edge expects on challenge-script downloads.
const SCRIPT_REFERER: &str = "https://cursor.com/cn/learn";
/// Bodies under this size are block pages or empty responses, not the script.
const MIN_SCRIPT_BYTES: usize = 1000;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("script download failed: {0}")]
    Download(String),
    #[error("script download returned HTTP {0}")]
    DownloadStatus(u16),
    #[error("script body too small: {0} bytes")]
    ScriptTooSmall(usize),
    #[error("processor request failed: {0}")]
    Process(String),
    #[error("processor returned HTTP {0}")]
    ProcessStatus(u16),
    #[error("processor response invalid: {0}")]
    ProcessDecode(String),
    #[error("processor reported failure")]
    ProcessRejected,
}

/// Produces a fresh challenge token. One implementation talks to the real
/// edge plus the external de-obfuscator; tests substitute an in-memory one.
pub trait ChallengeSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, RefreshError>> + Send + 'a>>;
}

pub struct HttpChallengeSource {
    client: Client,
    js_url: String,
    process_url: String,
}

impl HttpChallengeSource {
    pub fn new(client: Client, js_url: impl Into<String>, process_url: impl Into<String>) -> Self {
        Self {
            client,
            js_url: js_url.into(),
            process_url: process_url.into(),
        }
    }

    async fn download_script(&self) -> Result<String, RefreshError> {
        let resp = self
            .client
            .get(&self.js_url)
            .header(REFERER, SCRIPT_REFERER)
            .send()
            .await
            .map_err(|err| RefreshError::Download(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RefreshError::DownloadStatus(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|err| RefreshError::Download(err.to_string()))?;
        if body.len() < MIN_SCRIPT_BYTES {
            return Err(RefreshError::ScriptTooSmall(body.len()));
        }
        Ok(body)
    }

    async fn process_script(&self, script: &str) -> Result<String, RefreshError> {
        let payload = serde_json::json!({ "jsCode": script });
        let resp = self
            .client
            .post(&self.process_url)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|err| RefreshError::Process(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RefreshError::ProcessStatus(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| RefreshError::Process(err.to_string()))?;
        let parsed: ProcessResponse = serde_json::from_slice(&body)
            .map_err(|err| RefreshError::ProcessDecode(err.to_string()))?;
        if !parsed.success {
            return Err(RefreshError::ProcessRejected);
        }

        // The serialized form of the opaque `data` object IS the token.
        serde_json::to_string(&parsed.data)
            .map_err(|err| RefreshError::ProcessDecode(err.to_string()))
    }
}

impl ChallengeSource for HttpChallengeSource {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, RefreshError>> + Send + 'a>> {
        Box::pin(async move {
            let script = self.download_script().await?;
            self.process_script(&script).await
        })
    }
}

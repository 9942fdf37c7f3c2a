use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::{GatewayState, error_response};

pub async fn require_api_key(
    State(state): State<GatewayState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.auth.enabled {
        return next.run(req).await;
    }

    match bearer_key(req.headers()) {
        Some(key) if state.auth.keys.contains(key) => next.run(req).await,
        _ => {
            warn!(event = "auth.rejected", path = %req.uri().path());
            error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid API key provided",
                "invalid_request_error",
            )
        }
    }
}

fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(value) = value {
            map.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn extracts_bearer_keys() {
        assert_eq!(bearer_key(&headers(Some("Bearer sk-1"))), Some("sk-1"));
        assert_eq!(bearer_key(&headers(Some("Bearer  sk-1 "))), Some("sk-1"));
    }

    #[test]
    fn rejects_missing_or_malformed_headers() {
        assert_eq!(bearer_key(&headers(None)), None);
        assert_eq!(bearer_key(&headers(Some("sk-1"))), None);
        assert_eq!(bearer_key(&headers(Some("Basic sk-1"))), None);
        assert_eq!(bearer_key(&headers(Some("Bearer "))), None);
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use cgate_core::{ChatService, GatewayError, TokenManager};
use cgate_protocol::openai::error::ErrorResponse;

mod auth;
mod chat;
mod health;

#[derive(Clone)]
pub struct AuthSettings {
    pub enabled: bool,
    pub keys: Arc<HashSet<String>>,
}

#[derive(Clone)]
pub struct GatewayState {
    pub chat: Arc<ChatService>,
    pub manager: Arc<TokenManager>,
    pub default_model: String,
    pub auth: AuthSettings,
}

pub fn gateway_router(state: GatewayState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(health::list_models))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .with_state(state)
        .merge(protected)
}

pub(crate) fn error_response(status: StatusCode, message: &str, kind: &str) -> Response {
    (status, axum::Json(ErrorResponse::new(message, kind))).into_response()
}

pub(crate) fn gateway_error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, &err.to_string(), err.kind())
}

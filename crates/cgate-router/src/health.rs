use axum::Json;
use axum::extract::State;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use cgate_protocol::openai::models::{Model, ModelList};

use crate::GatewayState;

/// Models the upstream serves; the list is fixed, the edge exposes no
/// discovery endpoint.
const MODEL_IDS: &[&str] = &[
    "anthropic/claude-4.5-sonnet",
    "anthropic/claude-4-sonnet",
    "anthropic/claude-opus-4.1",
    "openai/gpt-5",
    "google/gemini-2.5-pro",
    "xai/grok-4",
];

pub async fn list_models() -> Json<ModelList> {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    Json(ModelList {
        object: "list".to_string(),
        data: MODEL_IDS
            .iter()
            .map(|id| Model {
                id: (*id).to_string(),
                object: "model".to_string(),
                created,
                owned_by: "cursor".to_string(),
            })
            .collect(),
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    manager_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_age_secs: Option<u64>,
    refresher_active: bool,
    total_requests: i64,
    success_requests: i64,
    failed_requests: i64,
    cache_hits: i64,
}

pub async fn health(State(state): State<GatewayState>) -> Json<impl Serialize> {
    let stats = state.manager.stats().await;
    Json(HealthResponse {
        status: "ok",
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        manager_healthy: state.manager.is_healthy().await,
        token_age_secs: stats.token_age_secs,
        refresher_active: stats.refresher_active,
        total_requests: stats.total_requests,
        success_requests: stats.success_requests,
        failed_requests: stats.failed_requests,
        cache_hits: stats.cache_hits,
    })
}

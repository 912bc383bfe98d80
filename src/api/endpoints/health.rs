//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    /// Canonical fields every document must carry.
    pub required_fields: Vec<String>,
}

/// `GET /api/health`: liveness plus the active extraction policy.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: crate::config::APP_NAME,
        version: crate::config::APP_VERSION,
        required_fields: ctx.pipeline.config().extraction.required_fields.clone(),
    })
}

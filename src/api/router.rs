//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::pipeline::KycPipeline;

/// Build the API router around a shared pipeline.
pub fn api_router(pipeline: Arc<KycPipeline>) -> Router {
    let ctx = ApiContext::new(pipeline);
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    // The upload limit follows the extraction size limit
    let evaluate = Router::new()
        .route("/evaluate", post(endpoints::evaluate::evaluate))
        .layer(DefaultBodyLimit::max(ctx.body_limit()));

    let routes = Router::new()
        .route("/health", get(endpoints::health::check))
        .merge(evaluate)
        .with_state(ctx);

    Router::new().nest("/api", routes)
}

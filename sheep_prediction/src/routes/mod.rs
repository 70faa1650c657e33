mod health;
mod metrics;
mod predict;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

pub use predict::{ApiError, ImageUpload, PredictionResponse, PREDICT_ROUTE};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::healthcheck::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route(PREDICT_ROUTE, post(predict::predict::<M>))
        .fallback(handle_404)
}

async fn handle_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "not_found",
            "message": "Not found. POST an image to /predict or GET /health.",
        })),
    )
}

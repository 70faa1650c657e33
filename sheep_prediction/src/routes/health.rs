use crate::{
    model_service::{ModelInfo, ModelService},
    server::SharedState,
};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Status {
    message: String,
    status: String,
}

pub async fn root() -> impl IntoResponse {
    Json(Status {
        message: "Sheep weight prediction service running".into(),
        status: "online".into(),
    })
}

#[derive(Serialize)]
pub struct Health {
    status: String,
    model_loaded: bool,
    model: ModelInfo,
}

/// The model is loaded before the listener is bound, so a reachable service
/// always reports it as loaded.
pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> impl IntoResponse {
    Json(Health {
        status: "healthy".into(),
        model_loaded: true,
        model: state.inference_service.model_info().clone(),
    })
}

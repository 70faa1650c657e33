use crate::{
    candle_service::CandleModelService,
    config::{Config, ModelBackend},
    inference_service::InferenceService,
    model_service::ModelService,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;

/// Loads the model, then serves until Ctrl+C or SIGTERM. A model that fails to
/// load means the listener is never bound.
pub async fn start_app(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting sheep weight prediction service");

    match config.model.backend {
        ModelBackend::Safetensors => {
            let model_service = CandleModelService::new(&config.model)
                .context("failed to load safetensors model")?;
            serve(model_service, &config).await
        }
        ModelBackend::Onnx => start_onnx(&config).await,
    }
}

#[cfg(feature = "onnx")]
async fn start_onnx(config: &Config) -> anyhow::Result<()> {
    let model_service = crate::ort_service::OrtModelService::new(&config.model)
        .context("failed to load onnx model")?;
    serve(model_service, config).await
}

#[cfg(not(feature = "onnx"))]
async fn start_onnx(_config: &Config) -> anyhow::Result<()> {
    Err(crate::error::ModelLoadError::BackendUnavailable("onnx").into())
}

async fn serve<M: ModelService>(model_service: M, config: &Config) -> anyhow::Result<()> {
    let inference_service = InferenceService::new(model_service, &config.prediction)
        .context("model outputs cannot be mapped to predictions")?;
    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

    let state = SharedState {
        inference_service,
        metrics,
    };
    let server = HttpServer::new(state, &config.server).await?;
    server.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

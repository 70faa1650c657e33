use std::path::PathBuf;
use thiserror::Error;

/// Startup failures. Any of these keeps the service from binding its listener.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Weights file not found: {0:?}")]
    WeightsNotFound(PathBuf),
    #[error("Failed to read weights file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid weights file: {0}")]
    InvalidWeights(String),
    #[error("Stored parameters `{first}` and `{second}` both map to `{target}`")]
    KeyCollision {
        first: String,
        second: String,
        target: String,
    },
    #[error("Weights are incompatible with the model definition: {0}")]
    Incompatible(#[from] candle_core::Error),
    #[error("Invalid checkpoint metadata `{key}`: {reason}")]
    Metadata { key: String, reason: String },
    #[error("Failed to initialise device: {0}")]
    Device(String),
    #[error("Unsupported target layout: {0}")]
    TargetLayout(String),
    #[error("The {0} backend is not compiled in, rebuild with the `{0}` feature")]
    BackendUnavailable(&'static str),
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Forward pass failed: {0}")]
    Forward(String),
    #[error("Expected {expected} model outputs, got {got}")]
    OutputShape { expected: usize, got: usize },
    #[error("Model produced a non-finite value for `{target}`")]
    NonFinite { target: String },
    #[error("Inference task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

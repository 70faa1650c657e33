use crate::{error::InferenceError, prediction::TargetScaler, preprocess::PreprocessedTensor};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub backend: String,
    pub architecture: String,
    pub input_shape: Vec<usize>,
    pub target_names: Vec<String>,
    #[serde(skip)]
    pub target_scaler: Option<TargetScaler>,
}

/// A loaded regression model. Implementations are immutable after load and
/// are shared across requests without locking.
pub trait ModelService: Send + Sync + 'static {
    /// Single forward pass, returning one raw value per target.
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError>;

    fn info(&self) -> &ModelInfo;
}

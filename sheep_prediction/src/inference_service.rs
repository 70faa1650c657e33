use crate::{
    config::PredictionConfig,
    error::{InferenceError, ModelLoadError, PredictionError},
    model_service::{ModelInfo, ModelService},
    prediction::{OutputShaper, PredictionResult},
    preprocess::preprocess_image,
};
use std::sync::Arc;

/// Preprocess, forward and shape, for one image at a time.
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    shaper: Arc<OutputShaper>,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            shaper: self.shaper.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(
        model_service: M,
        prediction_config: &PredictionConfig,
    ) -> Result<Self, ModelLoadError> {
        let info = model_service.info();
        let shaper = OutputShaper::new(
            &info.target_names,
            info.target_scaler.clone(),
            prediction_config.confidence_placeholder,
        )?;
        Ok(Self {
            model_service: Arc::new(model_service),
            shaper: Arc::new(shaper),
        })
    }

    pub fn model_info(&self) -> &ModelInfo {
        self.model_service.info()
    }

    /// Runs on the calling thread. Invalid images never reach the model.
    pub fn predict_blocking(&self, image_data: &[u8]) -> Result<PredictionResult, PredictionError> {
        let input = preprocess_image(image_data)?;
        let outputs = self.model_service.forward(&input)?;
        Ok(self.shaper.shape(&outputs)?)
    }

    /// Moves the CPU-bound work to the blocking pool.
    pub async fn predict(
        &self,
        image_data: axum::body::Bytes,
    ) -> Result<PredictionResult, PredictionError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.predict_blocking(&image_data))
            .await
            .map_err(|e| InferenceError::Aborted(e.to_string()))?
    }
}

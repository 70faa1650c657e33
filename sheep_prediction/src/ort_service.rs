use crate::{
    config::ModelConfig,
    error::{InferenceError, ModelLoadError},
    model_service::{ModelInfo, ModelService},
    prediction::default_target_names,
    preprocess::{PreprocessedTensor, INPUT_CHANNELS, INPUT_SIZE},
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Exported ONNX graph run through a round-robin pool of sessions.
///
/// Parameter names are baked into the graph, so no key remapping happens here.
pub struct OrtModelService {
    sessions: Vec<Mutex<Session>>,
    output_name: String,
    counter: AtomicUsize,
    info: ModelInfo,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let path = model_config.get_path();
        if !path.exists() {
            return Err(ModelLoadError::WeightsNotFound(path));
        }
        ort::init().with_name("sheep_prediction").commit()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let output_name = {
            let session = sessions[0]
                .lock()
                .map_err(|e| ModelLoadError::InvalidWeights(e.to_string()))?;
            session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| {
                    ModelLoadError::InvalidWeights("ONNX graph declares no outputs".to_string())
                })?
        };

        tracing::info!("Created {} ONNX sessions from {:?}", num_instances, path);

        let size = INPUT_SIZE as usize;
        let info = ModelInfo {
            name: model_config.weights_file.clone(),
            backend: "onnx".to_string(),
            architecture: model_config.architecture.as_str().to_string(),
            input_shape: vec![1, INPUT_CHANNELS, size, size],
            target_names: model_config
                .target_names
                .clone()
                .unwrap_or_else(default_target_names),
            target_scaler: None,
        };

        Ok(Self {
            sessions,
            output_name,
            counter: AtomicUsize::new(0),
            info,
        })
    }
}

impl ModelService for OrtModelService {
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Forward(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.batched())
            .map_err(|e| InferenceError::Forward(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Forward(format!("inference failed: {}", e)))?;

        let (_, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Forward(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }

    fn info(&self) -> &ModelInfo {
        &self.info
    }
}

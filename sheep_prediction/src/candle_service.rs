use crate::{
    config::ModelConfig,
    error::{InferenceError, ModelLoadError},
    model_service::{ModelInfo, ModelService},
    prediction::default_target_names,
    preprocess::{PreprocessedTensor, INPUT_CHANNELS, INPUT_SIZE},
    resnet::{ResNet, ResNetConfig},
    weights::{load_checkpoint, Checkpoint},
};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;

pub struct CandleModelService {
    model: ResNet,
    device: Device,
    info: ModelInfo,
}

impl CandleModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let device = if model_config.use_cuda {
            Device::cuda_if_available(0).map_err(|e| ModelLoadError::Device(e.to_string()))?
        } else {
            Device::Cpu
        };
        let path = model_config.get_path();
        tracing::info!("Loading {} weights from {:?}", model_config.architecture.as_str(), path);

        let mut checkpoint = load_checkpoint(&path, &model_config.key_remap, &device)?;
        if checkpoint.target_names.is_none() {
            checkpoint.target_names = model_config.target_names.clone();
        }
        let num_outputs = checkpoint
            .target_names
            .as_ref()
            .map_or(default_target_names().len(), Vec::len);

        let service = Self::from_checkpoint(
            checkpoint,
            ResNetConfig::for_architecture(model_config.architecture, num_outputs),
            device,
            &model_config.weights_file,
        )?;
        tracing::info!(
            "Model ready on {:?} with targets {:?}",
            service.device,
            service.info.target_names
        );
        Ok(service)
    }

    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        resnet_config: ResNetConfig,
        device: Device,
        name: &str,
    ) -> Result<Self, ModelLoadError> {
        let target_names = checkpoint.target_names.unwrap_or_else(default_target_names);
        if target_names.len() != resnet_config.num_outputs {
            return Err(ModelLoadError::TargetLayout(format!(
                "{} target names for a model with {} outputs",
                target_names.len(),
                resnet_config.num_outputs
            )));
        }

        let vb = VarBuilder::from_tensors(checkpoint.tensors, DType::F32, &device);
        let model = ResNet::new(resnet_config, vb)?;

        let size = INPUT_SIZE as usize;
        let info = ModelInfo {
            name: name.to_string(),
            backend: "safetensors".to_string(),
            architecture: model.config().architecture.as_str().to_string(),
            input_shape: vec![1, INPUT_CHANNELS, size, size],
            target_names,
            target_scaler: checkpoint.target_scaler,
        };

        Ok(Self {
            model,
            device,
            info,
        })
    }

    fn run(&self, input: &PreprocessedTensor) -> candle_core::Result<Vec<f32>> {
        let batched = input.batched();
        let tensor =
            Tensor::from_iter(batched.iter().copied(), &self.device)?.reshape(batched.dim())?;
        self.model.forward(&tensor)?.squeeze(0)?.to_vec1::<f32>()
    }
}

impl ModelService for CandleModelService {
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let outputs = self
            .run(input)
            .map_err(|e| InferenceError::Forward(e.to_string()))?;
        tracing::debug!("Raw model outputs: {:?}", outputs);
        Ok(outputs)
    }

    fn info(&self) -> &ModelInfo {
        &self.info
    }
}

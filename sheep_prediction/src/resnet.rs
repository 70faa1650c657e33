//! Regression backbone: a torchvision ResNet whose `fc` classifier has one
//! output per prediction target. Parameter names follow torchvision
//! (`conv1`, `bn1`, `layer{1..4}.{i}.*`, `fc`), so checkpoints fine-tuned from
//! `torchvision.models.resnet18` load once their prefixes are remapped.

use crate::config::Architecture;
use candle_core::{Module, Result, Tensor};
use candle_nn::{Func, VarBuilder};
use candle_transformers::models::resnet;

/// Width of the pooled features feeding `fc`, for both supported depths.
pub const FEATURE_CHANNELS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResNetConfig {
    pub architecture: Architecture,
    pub num_outputs: usize,
}

impl ResNetConfig {
    pub fn for_architecture(architecture: Architecture, num_outputs: usize) -> Self {
        Self {
            architecture,
            num_outputs,
        }
    }
}

/// Inference-only: batch norms always use their running statistics.
pub struct ResNet {
    config: ResNetConfig,
    inner: Func<'static>,
}

impl ResNet {
    pub fn new(config: ResNetConfig, vb: VarBuilder<'static>) -> Result<Self> {
        let inner = match config.architecture {
            Architecture::Resnet18 => resnet::resnet18(config.num_outputs, vb)?,
            Architecture::Resnet34 => resnet::resnet34(config.num_outputs, vb)?,
        };
        Ok(Self { config, inner })
    }

    pub fn config(&self) -> ResNetConfig {
        self.config
    }
}

impl Module for ResNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.forward(xs)
    }
}

use crate::{
    config::Architecture,
    resnet::{ResNet, ResNetConfig},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use safetensors::{tensor::TensorView, Dtype};
use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
};

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sheep-prediction-{}-{}", std::process::id(), name))
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

pub fn test_resnet_config() -> ResNetConfig {
    ResNetConfig::for_architecture(Architecture::Resnet18, 4)
}

/// Randomly initialized parameters under their runtime names.
pub fn resnet_tensors(config: &ResNetConfig) -> HashMap<String, Tensor> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    ResNet::new(*config, vb).unwrap();
    let data = varmap.data().lock().unwrap();
    data.iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().copy().unwrap()))
        .collect()
}

pub fn write_checkpoint(
    path: &Path,
    tensors: &HashMap<String, Tensor>,
    metadata: Option<HashMap<String, String>>,
) {
    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, tensor)| {
            let bytes = tensor
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect();
            (name.clone(), tensor.dims().to_vec(), bytes)
        })
        .collect();
    let views: Vec<(String, TensorView<'_>)> = raw
        .iter()
        .map(|(name, shape, bytes)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap(),
            )
        })
        .collect();
    safetensors::serialize_to_file(views, &metadata, path).unwrap();
}

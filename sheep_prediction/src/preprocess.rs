//! Image decoding and normalization into the fixed model input.
//!
//! The constants below are an external contract: they are the ImageNet
//! statistics the regression model was fine-tuned with. Changing them does not
//! fail anything, it only makes every prediction worse.

use crate::error::PredictionError;
use image::{imageops::FilterType, ImageReader};
use ndarray::{Array3, ArrayView4, Axis};
use std::io::Cursor;

pub const INPUT_SIZE: u32 = 224;
pub const INPUT_CHANNELS: usize = 3;
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Model input in CHW layout, always `[3, 224, 224]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor(Array3<f32>);

impl PreprocessedTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ndarray::ArrayView3<'_, f32> {
        self.0.view()
    }

    /// Adds the leading batch axis expected by the backends.
    pub fn batched(&self) -> ArrayView4<'_, f32> {
        self.0.view().insert_axis(Axis(0))
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }
}

/// Inclusive `(min, max)` range a normalized value can take, per channel.
pub fn normalized_bounds() -> [(f32, f32); 3] {
    let mut bounds = [(0.0, 0.0); 3];
    for (c, bound) in bounds.iter_mut().enumerate() {
        *bound = (
            (0.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c],
            (1.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c],
        );
    }
    bounds
}

pub fn preprocess_image(image_data: &[u8]) -> Result<PreprocessedTensor, PredictionError> {
    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PredictionError::InvalidImage(format!("Error reading image: {}", e)))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| PredictionError::InvalidImage(format!("Error decoding image: {}", e)))?;

    if original_img.width() == 0 || original_img.height() == 0 {
        return Err(PredictionError::InvalidImage(
            "Image has a zero dimension".to_string(),
        ));
    }

    tracing::debug!(
        width = original_img.width(),
        height = original_img.height(),
        "Decoded image"
    );

    let rgb = original_img.to_rgb8();
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, RESIZE_FILTER);

    let size = INPUT_SIZE as usize;
    let mut input = Array3::<f32>::zeros((INPUT_CHANNELS, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..INPUT_CHANNELS {
            let value = pixel.0[c] as f32 / 255.;
            input[[c, y, x]] = (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }

    Ok(PreprocessedTensor(input))
}

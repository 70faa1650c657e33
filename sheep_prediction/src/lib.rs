mod app;
mod routes;

#[cfg(feature = "onnx")]
pub mod ort_service;
#[cfg(test)]
mod test_support;

pub mod candle_service;
pub mod config;
pub mod error;
pub mod inference_service;
pub mod model_service;
pub mod prediction;
pub mod preprocess;
pub mod resnet;
pub mod server;
pub mod telemetry;
pub mod weights;

pub use app::start_app;
pub use routes::{ApiError, ImageUpload, PredictionResponse};

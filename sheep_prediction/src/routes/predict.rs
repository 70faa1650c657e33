use crate::{
    error::{InferenceError, PredictionError},
    model_service::ModelService,
    prediction::{PredictionResult, WeightStatus},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::{collections::BTreeMap, time::Instant};
use thiserror::Error;
use tracing::instrument;

pub const PREDICT_ROUTE: &str = "/predict";
const FILE_FIELD: &str = "file";
const MULTIPART_FORM: &str = "multipart/form-data";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Upload { status: StatusCode, message: String },
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

impl ApiError {
    fn upload(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Upload {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Upload { status, .. } => *status,
            ApiError::Prediction(PredictionError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
            ApiError::Prediction(PredictionError::Inference(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Upload { .. } => "bad_request",
            ApiError::Prediction(PredictionError::InvalidImage(_)) => "invalid_image",
            ApiError::Prediction(PredictionError::Inference(_)) => "inference_error",
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        ApiError::Prediction(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(detail = %self, "Prediction failed");
        } else {
            tracing::warn!(detail = %self, "Rejected prediction request");
        }

        let body = Json(json!({
            "success": false,
            "error": self.category(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Media types are case-insensitive.
fn is_multipart_form(content_type: &str) -> bool {
    content_type
        .as_bytes()
        .get(..MULTIPART_FORM.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MULTIPART_FORM.as_bytes()))
}

/// The uploaded image, either a multipart `file` field or the raw request body.
#[derive(Debug)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl<S> FromRequest<S> for ImageUpload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(is_multipart_form);

        if !is_multipart {
            let data = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::upload(e.status(), e.body_text()))?;
            return Ok(Self {
                file_name: None,
                data,
            });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::upload(e.status(), e.body_text()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::upload(e.status(), e.body_text()))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::upload(e.status(), e.body_text()))?;
            return Ok(Self { file_name, data });
        }

        Err(ApiError::upload(
            StatusCode::BAD_REQUEST,
            format!("Multipart body has no `{}` field", FILE_FIELD),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub weight_kg: f32,
    pub lean_pct: f32,
    pub fat_pct: f32,
    pub bone_pct: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub status: WeightStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    pub raw_outputs: BTreeMap<String, f32>,
}

fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

impl PredictionResponse {
    pub fn new(result: PredictionResult, image_name: Option<String>) -> Self {
        Self {
            success: true,
            weight_kg: round_to(result.weight_kg, 2),
            lean_pct: round_to(result.lean_pct, 1),
            fat_pct: round_to(result.fat_pct, 1),
            bone_pct: round_to(result.bone_pct, 1),
            confidence: result.confidence.map(|c| round_to(c, 1)),
            status: result.status,
            image_name,
            raw_outputs: result
                .raw_outputs
                .into_iter()
                .map(|(name, value)| (name, round_to(value, 3)))
                .collect(),
        }
    }
}

#[instrument(skip(state, upload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    upload: Result<ImageUpload, ApiError>,
) -> Response {
    run_prediction(&state, upload).await.into_response()
}

async fn run_prediction<M: ModelService>(
    state: &SharedState<M>,
    upload: Result<ImageUpload, ApiError>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let upload = upload?;
    tracing::debug!(
        "Received image {:?} ({} bytes)",
        upload.file_name,
        upload.data.len()
    );

    let start = Instant::now();
    let result = state.inference_service.predict(upload.data).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, PREDICT_ROUTE);

    tracing::info!(
        weight_kg = result.weight_kg,
        lean_pct = result.lean_pct,
        fat_pct = result.fat_pct,
        bone_pct = result.bone_pct,
        "Prediction complete"
    );

    Ok(Json(PredictionResponse::new(result, upload.file_name)))
}

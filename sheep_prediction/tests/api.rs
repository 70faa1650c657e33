//! Router-level tests: the HTTP contract, driven through `tower::ServiceExt`.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::Value;
use sheep_prediction::{
    config::{PredictionConfig, ServerConfig},
    error::InferenceError,
    inference_service::InferenceService,
    model_service::{ModelInfo, ModelService},
    prediction::default_target_names,
    preprocess::PreprocessedTensor,
    server::{build_router, SharedState},
    telemetry::Metrics,
};
use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tower::ServiceExt;

const BOUNDARY: &str = "sheep-boundary";

struct MockModelService {
    outputs: Result<Vec<f32>, String>,
    calls: Arc<AtomicUsize>,
    info: ModelInfo,
}

impl ModelService for MockModelService {
    fn forward(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.shape(), &[3, 224, 224]);
        self.outputs.clone().map_err(InferenceError::Forward)
    }

    fn info(&self) -> &ModelInfo {
        &self.info
    }
}

fn server_config(max_upload_bytes: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_upload_bytes,
        cors_origin: "*".to_string(),
    }
}

fn test_app_with(
    outputs: Result<Vec<f32>, String>,
    max_upload_bytes: usize,
) -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = MockModelService {
        outputs,
        calls: calls.clone(),
        info: ModelInfo {
            name: "mock.safetensors".to_string(),
            backend: "mock".to_string(),
            architecture: "resnet18".to_string(),
            input_shape: vec![1, 3, 224, 224],
            target_names: default_target_names(),
            target_scaler: None,
        },
    };
    let prediction_config = PredictionConfig {
        confidence_placeholder: Some(92.04),
    };
    let state = SharedState {
        inference_service: InferenceService::new(model, &prediction_config).unwrap(),
        metrics: Arc::new(Metrics::new().unwrap()),
    };
    (build_router(state, &server_config(max_upload_bytes)), calls)
}

fn test_app() -> (Router, Arc<AtomicUsize>) {
    test_app_with(Ok(vec![52.314, 58.26, 24.04, 17.7]), 10 * 1024 * 1024)
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, ((x + y) % 256) as u8, (y % 256) as u8])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(body: Vec<u8>) -> Request<Body> {
    multipart_request_as("multipart/form-data", body)
}

fn multipart_request_as(media_type: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("{media_type}; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn scrape_metrics(app: Router) -> String {
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn raw_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_multipart_jpeg_returns_prediction() {
    let (app, calls) = test_app();
    let body = multipart_body("file", "sheep.jpg", &jpeg_bytes(500, 500));

    let (status, json) = send(app, multipart_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["image_name"], "sheep.jpg");
    assert_eq!(json["status"], "Healthy");
    for field in ["weight_kg", "lean_pct", "fat_pct", "bone_pct"] {
        assert!(json[field].as_f64().unwrap() >= 0.0, "{} is negative", field);
    }
    assert_eq!(json["weight_kg"].as_f64().unwrap() as f32, 52.31);
    assert_eq!(json["confidence"].as_f64().unwrap() as f32, 92.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_multipart_media_type_is_case_insensitive() {
    let (app, calls) = test_app();
    let body = multipart_body("file", "sheep.jpg", &jpeg_bytes(200, 200));

    let (status, json) = send(app, multipart_request_as("Multipart/Form-Data", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image_name"], "sheep.jpg");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_raw_body_is_accepted() {
    let (app, calls) = test_app();

    let (status, json) = send(app, raw_request(jpeg_bytes(120, 90))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("image_name").is_none());
    assert_eq!(json["raw_outputs"]["bone_pct"].as_f64().unwrap() as f32, 17.7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_image_blob_is_rejected_without_inference() {
    let (app, calls) = test_app();

    let (status, json) = send(app, raw_request(b"0123456789".to_vec())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "invalid_image");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_multipart_without_file_field_is_rejected() {
    let (app, calls) = test_app();
    let body = multipart_body("photo", "sheep.jpg", &jpeg_bytes(32, 32));

    let (status, json) = send(app, multipart_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "bad_request");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let (app, calls) = test_app_with(Ok(vec![1.0; 4]), 1024);

    let (status, json) = send(app, raw_request(jpeg_bytes(400, 400))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"], "bad_request");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inference_failure_maps_to_server_error() {
    let (app, calls) = test_app_with(Err("shape mismatch".to_string()), 10 * 1024 * 1024);

    let (status, json) = send(app, raw_request(jpeg_bytes(64, 64))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "inference_error");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_finite_outputs_map_to_server_error() {
    let (app, calls) = test_app_with(Ok(vec![f32::INFINITY, 50.0, 30.0, 20.0]), 10 * 1024 * 1024);

    let (status, json) = send(app, raw_request(jpeg_bytes(64, 64))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "inference_error");
    assert!(json["message"].as_str().unwrap().contains("weight_kg"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_predictions_are_identical() {
    let (app, _) = test_app();
    let image = jpeg_bytes(256, 256);

    let (_, first) = send(app.clone(), raw_request(image.clone())).await;
    let (_, second) = send(app, raw_request(image)).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_health_and_root() {
    let (app, _) = test_app();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["model"]["target_names"][0], "weight_kg");

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, json) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "online");
}

#[tokio::test]
async fn test_metrics_count_predictions() {
    let (app, _) = test_app();
    send(app.clone(), raw_request(jpeg_bytes(64, 64))).await;
    send(app.clone(), raw_request(b"garbage!!!".to_vec())).await;

    let text = scrape_metrics(app).await;

    assert!(text.contains(r#"http_requests_total{route="/predict",status="200"} 1"#));
    assert!(text.contains(r#"http_requests_total{route="/predict",status="400"} 1"#));
    assert!(text.contains(r#"prediction_duration_ms_count{route="/predict"} 1"#));
}

#[tokio::test]
async fn test_metrics_count_every_route() {
    let (app, _) = test_app();
    for uri in ["/health", "/health", "/", "/nope"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(app.clone(), request).await;
    }
    let (status, _) = send(app.clone(), raw_request(jpeg_bytes(400, 400))).await;
    assert_eq!(status, StatusCode::OK);

    let text = scrape_metrics(app).await;

    assert!(text.contains(r#"http_requests_total{route="/health",status="200"} 2"#));
    assert!(text.contains(r#"http_requests_total{route="/",status="200"} 1"#));
    assert!(text.contains(r#"http_requests_total{route="unmatched",status="404"} 1"#));
}

#[tokio::test]
async fn test_rejected_uploads_are_counted() {
    let (app, _) = test_app_with(Ok(vec![1.0; 4]), 1024);
    send(app.clone(), raw_request(jpeg_bytes(400, 400))).await;

    let text = scrape_metrics(app).await;

    assert!(text.contains(r#"http_requests_total{route="/predict",status="413"} 1"#));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (app, _) = test_app();
    let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();

    let (status, json) = send(app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

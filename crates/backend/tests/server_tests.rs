//! HTTP Server Tests
//!
//! Exercises routing, multipart handling and error bodies through
//! `handle_request` against the fixture network.

use candle_core::Device;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::Value;
use skinlens_backend::{handle_request, BackendConfig, PredictionService, ServerContext};
use skinlens_inference::test_utils::{
    gradient_rgba_png, solid_png, tiny_backbone, write_fixture_artifacts, FIXTURE_LABELS,
};
use skinlens_inference::{HybridClassifier, ModelArtifacts};
use std::sync::Arc;

const BOUNDARY: &str = "skinlens-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"lesion.png\"\r\n\
                         Content-Type: image/png\r\n\r\n",
                        name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn predict_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn context_with(config: &BackendConfig) -> Arc<ServerContext<HybridClassifier>> {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_fixture_artifacts(dir.path()).unwrap();
    let artifacts =
        ModelArtifacts::load_with_backbone(&paths, &Device::Cpu, tiny_backbone()).unwrap();
    let service = PredictionService::from_artifacts(artifacts, Device::Cpu, 0.5).unwrap();
    Arc::new(ServerContext::new(Arc::new(service), config))
}

fn context() -> Arc<ServerContext<HybridClassifier>> {
    context_with(&BackendConfig::default())
}

async fn send(
    context: &Arc<ServerContext<HybridClassifier>>,
    request: Request<Body>,
) -> (StatusCode, Value) {
    let response: Response<Body> = handle_request(request, Arc::clone(context)).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_predict_success() {
    let context = context();
    let image = solid_png(600, 450, [200, 120, 90]);
    let (status, json) = send(
        &context,
        predict_request(&[
            Part::Text("sex", "male"),
            Part::Text("dx_type", "histo"),
            Part::Text("localization", "back"),
            Part::Text("age", "45.0"),
            Part::File("image", &image),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["predicted_class"].is_string());
    let probabilities = json["class_probabilities"].as_object().unwrap();
    assert_eq!(probabilities.len(), FIXTURE_LABELS.len());
    let total: f64 = probabilities.values().map(|p| p.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-4);

    let metrics = context.metrics.snapshot();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.successful_predictions, 1);
}

#[tokio::test]
async fn test_identical_requests_identical_responses() {
    let context = context();
    let image = gradient_rgba_png(120, 80);
    let parts = [
        Part::Text("sex", "female"),
        Part::Text("dx_type", "consensus"),
        Part::Text("localization", "lower extremity"),
        Part::Text("age", "70"),
        Part::File("image", &image),
    ];

    let (_, first) = send(&context, predict_request(&parts)).await;
    let (_, second) = send(&context, predict_request(&parts)).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_field_is_400() {
    let context = context();
    let image = solid_png(32, 32, [10, 20, 30]);
    let (status, json) = send(
        &context,
        predict_request(&[
            Part::Text("sex", "male"),
            Part::Text("localization", "back"),
            Part::Text("age", "45"),
            Part::File("image", &image),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("dx_type"));
    assert_eq!(context.metrics.snapshot().failed_requests, 1);
}

#[tokio::test]
async fn test_unknown_category_is_400() {
    let context = context();
    let image = solid_png(32, 32, [10, 20, 30]);
    let (status, json) = send(
        &context,
        predict_request(&[
            Part::Text("sex", "X"),
            Part::Text("dx_type", "histo"),
            Part::Text("localization", "back"),
            Part::Text("age", "45"),
            Part::File("image", &image),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("'X'"));
}

#[tokio::test]
async fn test_undecodable_image_is_400() {
    let context = context();
    let (status, json) = send(
        &context,
        predict_request(&[
            Part::Text("sex", "male"),
            Part::Text("dx_type", "histo"),
            Part::Text("localization", "back"),
            Part::Text("age", "45"),
            Part::File("image", b"definitely not a png"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("cannot identify image file"));
}

#[tokio::test]
async fn test_non_multipart_body_is_400() {
    let context = context();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"sex":"male"}"#))
        .unwrap();

    let (status, json) = send(&context, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_oversized_upload_is_400() {
    let config = BackendConfig {
        max_upload_bytes: 2048,
        ..Default::default()
    };
    let context = context_with(&config);
    let image = solid_png(32, 32, [10, 20, 30]);
    let padding = "x".repeat(4096);
    let (status, json) = send(
        &context,
        predict_request(&[
            Part::Text("notes", &padding),
            Part::Text("sex", "male"),
            Part::Text("dx_type", "histo"),
            Part::Text("localization", "back"),
            Part::Text("age", "45"),
            Part::File("image", &image),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("upload limit"));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let context = context();

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, json) = send(&context, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["device"], "cpu");
    assert_eq!(json["classes"], FIXTURE_LABELS.len());

    let request = Request::get("/metrics").body(Body::empty()).unwrap();
    let (status, json) = send(&context, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_requests"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let context = context();
    let request = Request::get("/predict").body(Body::empty()).unwrap();
    let (status, json) = send(&context, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not found");
}

#[tokio::test]
async fn test_cors_preflight() {
    let context = context();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/predict")
        .body(Body::empty())
        .unwrap();
    let response = handle_request(request, Arc::clone(&context)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response
        .headers()
        .contains_key("access-control-allow-methods"));

    let config = BackendConfig {
        enable_cors: false,
        ..Default::default()
    };
    let context = context_with(&config);
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let response = handle_request(request, Arc::clone(&context)).await.unwrap();
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));
}

//! Router-level tests: admission, validation, and status queries against a
//! temp store with a fixed catalog and a canned video probe.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use localtrack_api::probe::VideoProbe;
use localtrack_api::{router, AppState, ModelSource};
use localtrack_config::DefaultsConfig;
use localtrack_objectstore::ModelCatalog;
use localtrack_store::JobStore;

const MODEL: &str = "yolov5x_mbay_benthic_model.tar.gz";
const MODEL_URI: &str = "s3://m3-video-processing/models/yolov5x_mbay_benthic_model.tar.gz";
const VIDEO: &str = "http://localhost:8090/video/V4361.mp4";

struct StaticModels(Vec<String>);

#[async_trait]
impl ModelSource for StaticModels {
    async fn fetch(&self) -> anyhow::Result<ModelCatalog> {
        Ok(ModelCatalog::from_uris(self.0.clone()))
    }
}

struct StubProbe {
    available: bool,
}

#[async_trait]
impl VideoProbe for StubProbe {
    async fn is_available(&self, _url: &str) -> bool {
        self.available
    }
}

async fn test_state(models: Vec<String>, video_available: bool) -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let store = JobStore::open(dir.path()).await.unwrap();
    let state = Arc::new(AppState {
        store,
        models: Box::new(StaticModels(models)),
        probe: Box::new(StubProbe {
            available: video_available,
        }),
        engine: "mbari/strongsort-yolov5:latest".to_string(),
        defaults: DefaultsConfig::default(),
    });
    (dir, state)
}

async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn root_reports_version() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, body) = send(state, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().starts_with("localtrack "));
}

#[tokio::test]
async fn models_lists_catalog_names() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, body) = send(state, get("/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], json!([MODEL]));
}

#[tokio::test]
async fn health_ok_with_models_and_store() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, body) = send(state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "OK");
}

#[tokio::test]
async fn health_unavailable_without_models() {
    let (_dir, state) = test_state(Vec::new(), true).await;
    let (status, body) = send(state, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "no models available");
}

#[tokio::test]
async fn predict_unknown_model_is_404_and_inserts_nothing() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, body) = send(
        state.clone(),
        post_json("/predict", json!({ "model": "does_not_exist", "video": VIDEO })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "does_not_exist not found");

    let (_, body) = send(state, get("/status")).await;
    assert_eq!(body["jobs"], json!([]));
}

#[tokio::test]
async fn predict_unreachable_video_is_404_and_inserts_nothing() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], false).await;
    let missing = "http://localhost:8090/video/missing.mp4";
    let (status, body) = send(
        state.clone(),
        post_json("/predict", json!({ "model": MODEL, "video": missing })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], format!("{missing} not found"));

    let (_, body) = send(state, get("/status")).await;
    assert_eq!(body["jobs"], json!([]));
}

#[tokio::test]
async fn predict_then_status_roundtrip() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let metadata = json!({ "deployment": "Dive 1377", "depth_m": 812 });
    let (status, body) = send(
        state.clone(),
        post_json(
            "/predict",
            json!({ "model": MODEL, "video": VIDEO, "metadata": metadata }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("{VIDEO} queued for processing"));
    let job_id = body["job_id"].as_i64().unwrap();
    let job_name = body["job_name"].as_str().unwrap().to_string();

    let (status, detail) = send(state.clone(), get(&format!("/status_by_id/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "QUEUED");
    assert_eq!(detail["name"], job_name);
    assert_eq!(detail["video"], VIDEO);
    assert_eq!(detail["model"], MODEL_URI);
    assert_eq!(detail["metadata"], metadata);
    // No results yet.
    assert_eq!(detail["num_tracks"], Value::Null);
    assert_eq!(detail["s3_path"], Value::Null);
    // Default args substituted on admission.
    assert_eq!(detail["args"], localtrack_config::DEFAULT_TRACK_ARGS);

    let encoded_name: String = job_name.replace(' ', "%20");
    let (status, by_name) = send(state, get(&format!("/status_by_name/{encoded_name}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_name["job_id"], job_id);
}

#[tokio::test]
async fn predict_validates_email() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, _) = send(
        state.clone(),
        post_json(
            "/predict",
            json!({ "model": MODEL, "video": VIDEO, "email": "not-an-email" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        state.clone(),
        post_json(
            "/predict",
            json!({ "model": MODEL, "video": VIDEO, "email": "dcline@mbari.org" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job_id = body["job_id"].as_i64().unwrap();
    let (_, detail) = send(state, get(&format!("/status_by_id/{job_id}"))).await;
    assert_eq!(detail["metadata"]["email"], "dcline@mbari.org");
}

#[tokio::test]
async fn status_all_lists_jobs_with_derived_status() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    send(
        state.clone(),
        post_json("/predict", json!({ "model": MODEL, "video": VIDEO })),
    )
    .await;
    send(
        state.clone(),
        post_json("/predict", json!({ "model": MODEL, "video": VIDEO })),
    )
    .await;

    let (status, body) = send(state, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j["status"] == "QUEUED"));
}

#[tokio::test]
async fn unknown_job_is_404() {
    let (_dir, state) = test_state(vec![MODEL_URI.to_string()], true).await;
    let (status, _) = send(state.clone(), get("/status_by_id/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(state, get("/status_by_name/no%20such%20job")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

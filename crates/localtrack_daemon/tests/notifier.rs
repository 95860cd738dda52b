//! Webhook delivery tests against a local multipart receiver.

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

use localtrack_daemon::Notifier;
use localtrack_store::{encode_metadata, JobKind, JobRecord};

#[derive(Debug)]
struct Received {
    metadata: String,
    file_name: String,
    file_bytes: Vec<u8>,
}

async fn receive(
    State(tx): State<Arc<mpsc::Sender<Received>>>,
    mut multipart: Multipart,
) -> &'static str {
    let mut metadata = String::new();
    let mut file_name = String::new();
    let mut file_bytes = Vec::new();

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("metadata") => metadata = field.text().await.unwrap(),
            Some("file") => {
                file_name = field.file_name().unwrap_or_default().to_string();
                file_bytes = field.bytes().await.unwrap().to_vec();
            }
            _ => {}
        }
    }

    tx.send(Received {
        metadata,
        file_name,
        file_bytes,
    })
    .await
    .unwrap();
    "ok"
}

async fn start_receiver() -> (String, mpsc::Receiver<Received>) {
    let (tx, rx) = mpsc::channel(4);
    let app = Router::new()
        .route("/notify", post(receive))
        .with_state(Arc::new(tx));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/notify"), rx)
}

fn job_with_metadata(metadata: serde_json::Value) -> JobRecord {
    JobRecord {
        id: 42,
        name: "yolov5s V4361 fiona diving".to_string(),
        engine: "mbari/strongsort-yolov5:latest".to_string(),
        model: "s3://root/models/yolov5s.pt".to_string(),
        args: None,
        metadata_b64: Some(encode_metadata(&metadata).unwrap()),
        job_type: JobKind::Docker,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn success_notification_carries_archive_and_metadata() {
    let (url, mut rx) = start_receiver().await;
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("V4361.tracks.tar.gz");
    std::fs::write(&archive, b"archive-bytes").unwrap();

    let notifier = Notifier::new(Some(url));
    let job = job_with_metadata(serde_json::json!({ "deployment": "Dive 1377" }));
    notifier.notify(&job, Some(&archive)).await.unwrap();

    let received = rx.recv().await.unwrap();
    let metadata: serde_json::Value = serde_json::from_str(&received.metadata).unwrap();
    assert_eq!(metadata["deployment"], "Dive 1377");
    assert_eq!(received.file_name, "V4361.tracks.tar.gz");
    assert_eq!(received.file_bytes, b"archive-bytes");
}

#[tokio::test]
async fn failure_notification_sends_empty_placeholder() {
    let (url, mut rx) = start_receiver().await;

    let notifier = Notifier::new(Some(url));
    let job = job_with_metadata(serde_json::json!({}));
    notifier.notify(&job, None).await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.file_name, "empty.tar.gz");
    assert!(received.file_bytes.is_empty());
}

#[tokio::test]
async fn unconfigured_notifier_skips_delivery() {
    let notifier = Notifier::new(None);
    assert!(!notifier.is_enabled());
    let job = job_with_metadata(serde_json::json!({}));
    // No receiver anywhere; must still succeed.
    notifier.notify(&job, None).await.unwrap();
}

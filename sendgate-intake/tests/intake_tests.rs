//! HTTP-level tests for the intake endpoint

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use sendgate_common::{Signal, mail::attachment_filename};
use sendgate_intake::{IntakeConfig, IntakePipeline, IntakeServer, router};
use sendgate_spool::{AttachmentStore, FileAttachmentStore, MemoryAttachmentStore, MemoryQueue};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::broadcast,
};
use tower::ServiceExt;

const BOUNDARY: &str = "sendgate-test-boundary";

/// Encode text fields and `(filename, content)` file parts.
fn form(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }

    for (filename, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mail")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

struct Harness {
    store: MemoryAttachmentStore,
    queue: MemoryQueue,
    pipeline: Arc<IntakePipeline>,
}

fn harness() -> Harness {
    let store = MemoryAttachmentStore::new();
    let queue = MemoryQueue::default();
    let pipeline = Arc::new(IntakePipeline::new(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
    ));

    Harness {
        store,
        queue,
        pipeline,
    }
}

async fn call(harness: &Harness, config: &IntakeConfig, request: Request<Body>) -> (StatusCode, String) {
    let response = router(config, Arc::clone(&harness.pipeline))
        .oneshot(request)
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

const COMPLETE: [(&str, &str); 4] = [
    ("From", "from@gmail.com"),
    ("To", "to@gmail.com"),
    ("Subject", "Hello Neo"),
    ("Body", "<p>Hello world</p>"),
];

#[tokio::test]
async fn test_enqueue_with_attachment() {
    let harness = harness();
    let config = IntakeConfig::default();

    let (status, body) = call(
        &harness,
        &config,
        post(form(&COMPLETE, &[("attachment.txt", b"follow the white rabbit")])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Enqueue mail success.");

    let mail = harness.queue.pending_mail().unwrap().remove(0);
    assert_eq!(mail.from, "from@gmail.com");
    assert_eq!(mail.body, "<p>Hello world</p>");
    assert_eq!(mail.attached_blob_names.len(), 1);

    let blob = &mail.attached_blob_names[0];
    assert_eq!(attachment_filename(blob), "attachment.txt");
    assert_eq!(
        harness.store.read_all(blob).await.unwrap(),
        b"follow the white rabbit"
    );
}

#[tokio::test]
async fn test_reserved_filename_is_stored_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAttachmentStore::new(dir.path().join("blobs")).unwrap();
    store.init().unwrap();
    let queue = MemoryQueue::default();
    let pipeline = Arc::new(IntakePipeline::new(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
    ));

    let response = router(&IntakeConfig::default(), pipeline)
        .oneshot(post(form(&COMPLETE, &[(".tmp_report.txt", b"quarterly")])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mail = queue.pending_mail().unwrap().remove(0);
    let blob = &mail.attached_blob_names[0];
    assert_eq!(attachment_filename(blob), "report.txt");
    assert_eq!(store.read_all(blob).await.unwrap(), b"quarterly");
}

#[tokio::test]
async fn test_missing_field_is_bad_request() {
    let harness = harness();
    let config = IntakeConfig::default();

    let (status, body) = call(
        &harness,
        &config,
        post(form(&[("From", "a@x.com"), ("To", "b@gmail.com"), ("Body", "b")], &[])),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Key:Subject is missing.");
    assert_eq!(harness.queue.pending(), 0);
}

#[tokio::test]
async fn test_field_names_are_case_insensitive() {
    let harness = harness();
    let config = IntakeConfig::default();

    let fields = [
        ("from", "a@x.com"),
        ("TO", "b@gmail.com"),
        ("subject", "s"),
        ("body", "b"),
        ("Body", "second body is ignored"),
    ];
    let (status, _) = call(&harness, &config, post(form(&fields, &[]))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.queue.pending_mail().unwrap()[0].body, "b");
}

#[tokio::test]
async fn test_storage_outage_is_service_unavailable() {
    let harness = harness();
    let config = IntakeConfig::default();
    harness.queue.set_available(false);

    let (status, _) = call(&harness, &config, post(form(&COMPLETE, &[]))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let harness = harness();
    let config = IntakeConfig {
        max_body_bytes: 1024,
        ..IntakeConfig::default()
    };

    let (status, _) = call(
        &harness,
        &config,
        post(form(&COMPLETE, &[("big.bin", &[0_u8; 4096])])),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(harness.store.is_empty());
    assert_eq!(harness.queue.pending(), 0);
}

#[tokio::test]
async fn test_non_multipart_request_is_rejected() {
    let harness = harness();
    let config = IntakeConfig::default();

    let request = Request::builder()
        .method("POST")
        .uri("/mail")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, _) = call(&harness, &config, request).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_server_serves_until_shutdown() {
    let harness = harness();
    let config = IntakeConfig {
        listen_address: "127.0.0.1:0".to_string(),
        ..IntakeConfig::default()
    };

    let server = IntakeServer::new(config, Arc::clone(&harness.pipeline))
        .await
        .unwrap();
    let address = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let serving = tokio::spawn(server.serve(shutdown_rx));

    let body = form(&COMPLETE, &[]);
    let mut stream = TcpStream::connect(address).await.unwrap();
    let head = format!(
        "POST /mail HTTP/1.1\r\nHost: {address}\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("Enqueue mail success."));
    assert_eq!(harness.queue.pending(), 1);

    shutdown_tx.send(Signal::Shutdown).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bind_failure_names_address() {
    let harness = harness();
    let config = IntakeConfig {
        listen_address: "not-an-address".to_string(),
        ..IntakeConfig::default()
    };

    let error = IntakeServer::new(config, harness.pipeline).await.err().unwrap();
    assert!(error.to_string().contains("not-an-address"));
}

#![allow(clippy::unwrap_used)]

//! Exercises the stores through the trait objects the rest of the workspace
//! receives from configuration.

use std::sync::Arc;

use sendgate_common::QueuedMail;
use sendgate_spool::{
    AttachmentStore, AttachmentStoreConfig, MailQueue, QueueBackend,
    QueueConfig, generate_blob_name,
};

fn file_stores(dir: &tempfile::TempDir) -> (Arc<dyn AttachmentStore>, Arc<dyn MailQueue>) {
    let attachments = AttachmentStoreConfig::File {
        path: dir.path().join("attachments"),
    }
    .into_store()
    .unwrap();

    let queue = QueueConfig {
        backend: QueueBackend::File {
            path: dir.path().join("queue"),
        },
        max_deliveries: 3,
        redelivery_delay_secs: 0,
        poll_interval_ms: 10,
    }
    .into_queue()
    .unwrap();

    (attachments, queue)
}

#[tokio::test]
async fn test_blob_names_travel_through_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (attachments, queue) = file_stores(&dir);

    let name = generate_blob_name("invoice.pdf");
    assert!(!attachments.exists(&name).await.unwrap());
    attachments.put(&name, b"%PDF-1.7".to_vec()).await.unwrap();

    let mail = QueuedMail {
        from: "billing@example.com".to_string(),
        to: "customer@gmail.com".to_string(),
        subject: "Invoice".to_string(),
        body: "<p>Attached.</p>".to_string(),
        attached_blob_names: vec![name.clone()],
    };
    queue.publish(&mail).await.unwrap();

    let delivery = queue.receive().await.unwrap();
    let received = delivery.mail().unwrap();
    assert_eq!(received, mail);

    for blob in &received.attached_blob_names {
        assert_eq!(attachments.read_all(blob).await.unwrap(), b"%PDF-1.7");
        attachments.delete(blob).await.unwrap();
    }
    queue.ack(delivery.id).await.unwrap();

    assert!(!attachments.exists(&name).await.unwrap());
    assert!(queue.try_receive().await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_backends_from_config() {
    let attachments = AttachmentStoreConfig::Memory.into_store().unwrap();
    let queue = QueueConfig {
        backend: QueueBackend::Memory,
        ..QueueConfig::default()
    }
    .into_queue()
    .unwrap();

    attachments.put("id/a.txt", b"a".to_vec()).await.unwrap();
    let id = queue.publish(&QueuedMail::default()).await.unwrap();

    let delivery = queue.receive().await.unwrap();
    assert_eq!(delivery.id, id);
    queue.nack(delivery.id).await.unwrap();
}

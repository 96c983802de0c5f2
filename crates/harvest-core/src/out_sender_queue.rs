//! The three-stage delivery pipeline: SerializeTag, Compress, Send.
//!
//! Ported from `SerializationUnit`/`PackagingUnit`/`AsyncQueue`'s
//! `process_message` for the `OUTSENDER_QUEUE` destination. Each stage is a
//! no-op if the document already passed it, so the pipeline is safe to
//! re-enter from recovery or a retried message.

use crate::router::Router;
use crate::socket_sender::SocketSender;
use crate::work_queue::{QueueError, QueueMessage, WorkQueue};
use harvest_protocol::{priority, CompressMessage, MessageHeader, OutSenderPhase, QueueKind, SendMessage};
use harvest_store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Implements the pipeline queue. The `Send` stage is handed off to a
/// dedicated background task over an unbounded channel so that a slow or
/// retrying delivery never blocks the worker pool that runs the other
/// stages.
pub struct OutSenderQueue {
    store: Arc<Store>,
    router: Arc<Router>,
    send_tx: mpsc::UnboundedSender<SendMessage>,
    max_buffer_retries: u32,
    retry_time_sec: u64,
}

impl OutSenderQueue {
    pub fn new(
        store: Arc<Store>,
        router: Arc<Router>,
        sender: Arc<SocketSender>,
        max_buffer_retries: u32,
        retry_time_sec: u64,
    ) -> Self {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_send_queue(store.clone(), sender, send_rx));
        OutSenderQueue { store, router, send_tx, max_buffer_retries, retry_time_sec }
    }

    async fn serialize_tag(
        &self,
        header: MessageHeader,
        entity_id: String,
        entity_db: String,
        entity_class: i64,
        entity_variant: i64,
    ) -> Result<(), QueueError> {
        let stamped = self
            .store
            .documents
            .mark_serialized(&entity_db, &entity_id, entity_class, entity_variant)
            .map_err(|e| QueueError::other(e.to_string()))?;
        if !stamped {
            return Ok(());
        }

        let mut package_header =
            MessageHeader::new("PackageEntity", format!("PackageEntity_{entity_id}"), header.content.clone(), QueueKind::OutSender);
        package_header.system_message = true;
        let package_msg = QueueMessage::OutSender(OutSenderPhase::Compress(CompressMessage {
            header: package_header,
            entity_id,
            entity_db,
        }));
        self.router.send(package_msg, priority::ENTITY_PACKAGE_REQ, 0.0, 0.0).await;
        Ok(())
    }

    async fn compress(&self, header: MessageHeader, entity_id: String, entity_db: String) -> Result<(), QueueError> {
        if self
            .store
            .documents
            .is_sent(&entity_db, &entity_id)
            .map_err(|e| QueueError::other(e.to_string()))?
        {
            return Ok(());
        }

        let doc = self
            .store
            .documents
            .get(&entity_db, &entity_id)
            .map_err(|e| QueueError::other(e.to_string()))?
            .ok_or_else(|| QueueError::other(format!("entity {entity_db}/{entity_id} missing at compress stage")))?;

        let payload = serde_json::to_vec(&doc).map_err(|e| QueueError::other(e.to_string()))?;

        let mut send_header =
            MessageHeader::new("SendEntity", format!("SendEntity_{entity_id}"), header.content.clone(), QueueKind::OutSender);
        send_header.system_message = true;
        let send_msg = QueueMessage::OutSender(OutSenderPhase::Send(SendMessage {
            header: send_header,
            entity_id,
            entity_db,
            payload,
        }));
        self.router.send(send_msg, priority::ENTITY_SEND_REQ, 0.0, 0.0).await;
        Ok(())
    }
}

async fn drain_send_queue(store: Arc<Store>, sender: Arc<SocketSender>, mut rx: mpsc::UnboundedReceiver<SendMessage>) {
    while let Some(msg) = rx.recv().await {
        match sender.send(&msg.payload).await {
            Ok(()) => {
                if let Err(e) = store.documents.mark_sent(&msg.entity_db, &msg.entity_id) {
                    tracing::error!(entity_id = %msg.entity_id, error = %e, "failed to mark entity sent");
                }
            }
            Err(e) => {
                tracing::error!(entity_id = %msg.entity_id, error = %e, "failed to deliver entity to aggregator");
            }
        }
    }
}

#[async_trait::async_trait]
impl WorkQueue for OutSenderQueue {
    fn name(&self) -> QueueKind {
        QueueKind::OutSender
    }

    fn max_buffer_retries(&self) -> u32 {
        self.max_buffer_retries
    }

    fn retry_time_sec(&self) -> u64 {
        self.retry_time_sec
    }

    async fn on_message(&self, msg: QueueMessage) -> Result<(), QueueError> {
        let QueueMessage::OutSender(phase) = msg else {
            return Err(QueueError::other("out sender queue received a non-pipeline message"));
        };

        match phase {
            OutSenderPhase::SerializeTag(m) => {
                self.serialize_tag(m.header, m.entity_id, m.entity_db, m.entity_class, m.entity_variant)
                    .await
            }
            OutSenderPhase::Compress(m) => self.compress(m.header, m.entity_id, m.entity_db).await,
            OutSenderPhase::Send(m) => self
                .send_tx
                .send(m)
                .map_err(|_| QueueError::other("send queue closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterConfig;
    use crate::work_queue::QueueRegistry;
    use harvest_protocol::SerializeTagMessage;

    fn serialize_tag_msg(entity_id: &str) -> QueueMessage {
        let header = MessageHeader::new("SerializeEntity", format!("SerializeEntity_{entity_id}"), "authors", QueueKind::OutSender);
        QueueMessage::OutSender(OutSenderPhase::SerializeTag(SerializeTagMessage {
            header,
            entity_id: entity_id.to_string(),
            entity_db: "authors".to_string(),
            entity_class: 1000,
            entity_variant: 0,
        }))
    }

    #[tokio::test]
    async fn serialize_tag_is_noop_for_missing_document() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = Router::new(QueueRegistry::new(), RouterConfig::default());
        let sender = Arc::new(SocketSender::new("127.0.0.1", 1));
        let queue = OutSenderQueue::new(store.clone(), router.clone(), sender, 3, 5);
        queue.on_message(serialize_tag_msg("missing")).await.unwrap();
        assert_eq!(router.queue_len(), 0);
    }

    #[tokio::test]
    async fn serialize_tag_stamps_doc_and_emits_compress() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({"name": "Ada"}), None)
            .unwrap();
        let router = Router::new(QueueRegistry::new(), RouterConfig::default());
        let sender = Arc::new(SocketSender::new("127.0.0.1", 1));
        let queue = OutSenderQueue::new(store.clone(), router.clone(), sender, 3, 5);

        queue.on_message(serialize_tag_msg("a1")).await.unwrap();

        let doc = store.documents.get("authors", "a1").unwrap().unwrap();
        assert!(doc.serialized);
        assert_eq!(router.queue_len(), 1);
    }

    #[tokio::test]
    async fn serialize_tag_twice_only_emits_compress_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({}), None)
            .unwrap();
        let router = Router::new(QueueRegistry::new(), RouterConfig::default());
        let sender = Arc::new(SocketSender::new("127.0.0.1", 1));
        let queue = OutSenderQueue::new(store.clone(), router.clone(), sender, 3, 5);

        queue.on_message(serialize_tag_msg("a1")).await.unwrap();
        queue.on_message(serialize_tag_msg("a1")).await.unwrap();
        assert_eq!(router.queue_len(), 1);
    }

    #[tokio::test]
    async fn compress_is_noop_when_already_sent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({}), None)
            .unwrap();
        store.documents.mark_sent("authors", "a1").unwrap();
        let router = Router::new(QueueRegistry::new(), RouterConfig::default());
        let sender = Arc::new(SocketSender::new("127.0.0.1", 1));
        let queue = OutSenderQueue::new(store.clone(), router.clone(), sender, 3, 5);

        let header = MessageHeader::new("PackageEntity", "PackageEntity_a1", "authors", QueueKind::OutSender);
        let msg = QueueMessage::OutSender(OutSenderPhase::Compress(CompressMessage {
            header,
            entity_id: "a1".to_string(),
            entity_db: "authors".to_string(),
        }));
        queue.on_message(msg).await.unwrap();
        assert_eq!(router.queue_len(), 0);
    }
}

use harvest_protocol::{FetchMessage, MessageHeader, OutSenderPhase, QueueKind};
use std::collections::HashMap;
use std::sync::Arc;

/// The union of message kinds that flow through the priority queue and are
/// dispatched to a [`WorkQueue`]. Unifies `FetchMessage` (destined for the
/// Scraper Queue) and `OutSenderPhase` (destined for the pipeline queue)
/// under one type so the router and priority queue need not be generic over
/// the destination.
#[derive(Debug, Clone)]
pub enum QueueMessage {
    Fetch(FetchMessage),
    OutSender(OutSenderPhase),
}

impl QueueMessage {
    pub fn header(&self) -> &MessageHeader {
        match self {
            QueueMessage::Fetch(m) => &m.header,
            QueueMessage::OutSender(OutSenderPhase::SerializeTag(m)) => &m.header,
            QueueMessage::OutSender(OutSenderPhase::Compress(m)) => &m.header,
            QueueMessage::OutSender(OutSenderPhase::Send(m)) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            QueueMessage::Fetch(m) => &mut m.header,
            QueueMessage::OutSender(OutSenderPhase::SerializeTag(m)) => &mut m.header,
            QueueMessage::OutSender(OutSenderPhase::Compress(m)) => &mut m.header,
            QueueMessage::OutSender(OutSenderPhase::Send(m)) => &mut m.header,
        }
    }

    pub fn destination(&self) -> QueueKind {
        match self {
            QueueMessage::Fetch(_) => QueueKind::Scraper,
            QueueMessage::OutSender(_) => QueueKind::OutSender,
        }
    }

    /// Dedup key for the router's duplicate tracker: message type + id.
    pub fn dedup_key(&self) -> String {
        let h = self.header();
        format!("{}#{}", h.message_type, h.message_id)
    }

    /// Hook for a message kind that needs to reset transient state before a
    /// retry. No current message kind needs this.
    pub fn prepare_for_retry(&mut self) {}
}

/// Errors an `on_message` implementation can raise. `Timeout` is requeued by
/// the router without consuming retry budget; anything else consumes one
/// retry and is logged, per spec.md §4.E.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("operation timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl QueueError {
    pub fn other(msg: impl Into<String>) -> Self {
        QueueError::Other(msg.into())
    }
}

/// Per-destination processor. Implementations are registered once at
/// startup into a [`QueueRegistry`] — a static table rather than a
/// reflective self-registration scheme.
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> QueueKind;

    async fn on_message(&self, msg: QueueMessage) -> Result<(), QueueError>;

    /// Retry budget for a failing message, per spec.md §4.E
    /// (`MAX_BUFFER_RETRIES`). Defaults to 3.
    fn max_buffer_retries(&self) -> u32 {
        3
    }

    /// Seconds to sleep between retries (`RETRY_TIME_SEC`). Defaults to 5.
    fn retry_time_sec(&self) -> u64 {
        5
    }
}

pub type QueueRegistry = HashMap<QueueKind, Arc<dyn WorkQueue>>;

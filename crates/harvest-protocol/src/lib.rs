// harvest-protocol: message and document wire types shared by the scheduling
// core, the source adapters, and the document store.
//
// Phase descriptors are tagged unions (one variant per source kind) rather
// than a single property-bag adapter type — see `AuthorPhase`,
// `PublicationPhase`, `JournalPhase`, `ConferencePhase`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Static priority values for message scheduling (lower numbers are more
/// urgent).
pub mod priority {
    pub const ENTITY_SEND_REQ: i64 = 10;
    pub const ENTITY_SERIAL_REQ: i64 = 30;
    pub const ENTITY_PACKAGE_REQ: i64 = 31;
    pub const AUTHOR_REQ: i64 = 102;
    pub const COAUTHOR_REQ: i64 = 103;
    pub const PUB_REQ: i64 = 105;
    pub const JOURNAL_REQ: i64 = 106;
    pub const CONFERENCE_REQ: i64 = 107;
}

// ---------------------------------------------------------------------------
// Queue destinations
// ---------------------------------------------------------------------------

/// Named destination queues a message can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Scraper,
    OutSender,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Scraper => "scraper_queue",
            QueueKind::OutSender => "out_sender_queue",
        }
    }
}

// ---------------------------------------------------------------------------
// Message header
// ---------------------------------------------------------------------------

/// Fields common to every message flowing through the priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_type: String,
    pub message_id: String,
    pub content: String,
    pub depth: u32,
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
    pub delayed: bool,
    pub system_message: bool,
    pub destination_queue: QueueKind,
}

impl MessageHeader {
    pub fn new(
        message_type: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
        destination_queue: QueueKind,
    ) -> Self {
        MessageHeader {
            message_type: message_type.into(),
            message_id: message_id.into(),
            content: content.into(),
            depth: 0,
            priority: -99,
            timestamp: Utc::now(),
            delayed: false,
            system_message: false,
            destination_queue,
        }
    }

    /// The depth/priority/timestamp ordering key, per spec.
    pub fn priority_tuple(&self) -> PriorityTuple {
        PriorityTuple {
            depth: self.depth,
            priority: self.priority,
            timestamp_epoch: self.timestamp.timestamp(),
        }
    }
}

/// `(depth, priority, timestamp)` — lower sorts first, so the older of two
/// otherwise-tied messages dequeues before the newer one (§8's ordering
/// invariant: `timestamp(m1) <= timestamp(m2)` for `m1` dequeued before `m2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityTuple {
    pub depth: u32,
    pub priority: i64,
    pub timestamp_epoch: i64,
}

impl PartialOrd for PriorityTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.depth, self.priority, self.timestamp_epoch).cmp(&(
            other.depth,
            other.priority,
            other.timestamp_epoch,
        ))
    }
}

// ---------------------------------------------------------------------------
// Phase descriptors (one enum per source adapter)
// ---------------------------------------------------------------------------

/// Fields every phase needs regardless of source, ported from
/// `AdapterPropertiesConstants`: `expected_id`, `roll_over_depth`,
/// `multi_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMeta {
    pub expected_id: String,
    pub roll_over_depth: bool,
    pub multi_result: bool,
}

impl PhaseMeta {
    pub fn new(expected_id: impl Into<String>) -> Self {
        PhaseMeta {
            expected_id: expected_id.into(),
            roll_over_depth: false,
            multi_result: false,
        }
    }

    pub fn with_roll_over(mut self, roll_over: bool) -> Self {
        self.roll_over_depth = roll_over;
        self
    }

    pub fn with_multi_result(mut self, multi: bool) -> Self {
        self.multi_result = multi;
        self
    }
}

/// The author source adapter's phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthorPhase {
    FetchAuthor { meta: PhaseMeta, author_name: String },
    FetchCoauthor { meta: PhaseMeta, author_name: String },
}

impl AuthorPhase {
    pub fn meta(&self) -> &PhaseMeta {
        match self {
            AuthorPhase::FetchAuthor { meta, .. } => meta,
            AuthorPhase::FetchCoauthor { meta, .. } => meta,
        }
    }

    pub fn phase_ref(&self) -> i64 {
        match self {
            AuthorPhase::FetchAuthor { .. } => 1000,
            AuthorPhase::FetchCoauthor { .. } => 1000,
        }
    }
}

/// The publication source adapter's phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PublicationPhase {
    FetchPublication { meta: PhaseMeta, publication_id: String },
}

impl PublicationPhase {
    pub fn meta(&self) -> &PhaseMeta {
        match self {
            PublicationPhase::FetchPublication { meta, .. } => meta,
        }
    }

    pub fn phase_ref(&self) -> i64 {
        1010
    }
}

/// The journal-ranking source adapter's phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalPhase {
    FetchJournalRank { meta: PhaseMeta, journal_name: String },
}

impl JournalPhase {
    pub fn meta(&self) -> &PhaseMeta {
        match self {
            JournalPhase::FetchJournalRank { meta, .. } => meta,
        }
    }

    pub fn phase_ref(&self) -> i64 {
        1030
    }
}

/// The conference-ranking source adapter's phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConferencePhase {
    FetchConferenceRank { meta: PhaseMeta, conference_name: String },
}

impl ConferencePhase {
    pub fn meta(&self) -> &PhaseMeta {
        match self {
            ConferencePhase::FetchConferenceRank { meta, .. } => meta,
        }
    }

    pub fn phase_ref(&self) -> i64 {
        1040
    }
}

/// The concrete fetch-message kinds the Scraper Queue type-switches on,
/// dispatched via an exhaustive match rather than a type-check chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetchPhase {
    Author(AuthorPhase),
    Publication(PublicationPhase),
    Journal(JournalPhase),
    Conference(ConferencePhase),
}

impl FetchPhase {
    pub fn expected_id(&self) -> &str {
        match self {
            FetchPhase::Author(p) => &p.meta().expected_id,
            FetchPhase::Publication(p) => &p.meta().expected_id,
            FetchPhase::Journal(p) => &p.meta().expected_id,
            FetchPhase::Conference(p) => &p.meta().expected_id,
        }
    }

    pub fn roll_over_depth(&self) -> bool {
        match self {
            FetchPhase::Author(p) => p.meta().roll_over_depth,
            FetchPhase::Publication(p) => p.meta().roll_over_depth,
            FetchPhase::Journal(p) => p.meta().roll_over_depth,
            FetchPhase::Conference(p) => p.meta().roll_over_depth,
        }
    }

    /// The document-store namespace this phase's fetch result belongs in.
    pub fn iface_ref(&self) -> &'static str {
        match self {
            FetchPhase::Author(_) => "authors",
            FetchPhase::Publication(_) => "publications",
            FetchPhase::Journal(_) => "journals",
            FetchPhase::Conference(_) => "conferences",
        }
    }

    /// The concrete phase name, used as a message's `message_type` / for
    /// stat-store bookkeeping keyed by fetch kind.
    pub fn message_type(&self) -> &'static str {
        match self {
            FetchPhase::Author(AuthorPhase::FetchAuthor { .. }) => "FetchAuthor",
            FetchPhase::Author(AuthorPhase::FetchCoauthor { .. }) => "FetchCoauthor",
            FetchPhase::Publication(PublicationPhase::FetchPublication { .. }) => "FetchPublication",
            FetchPhase::Journal(JournalPhase::FetchJournalRank { .. }) => "FetchJournalRank",
            FetchPhase::Conference(ConferencePhase::FetchConferenceRank { .. }) => "FetchConferenceRank",
        }
    }
}

/// A fetch request travelling through the priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchMessage {
    pub header: MessageHeader,
    pub phase: FetchPhase,
}

// ---------------------------------------------------------------------------
// System (pipeline) messages
// ---------------------------------------------------------------------------

/// Request to stamp class/variant ids and mark an entity serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializeTagMessage {
    pub header: MessageHeader,
    pub entity_id: String,
    pub entity_db: String,
    pub entity_class: i64,
    pub entity_variant: i64,
}

/// Request to compress a serialized entity to wire bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressMessage {
    pub header: MessageHeader,
    pub entity_id: String,
    pub entity_db: String,
}

/// Request to deliver already-compressed bytes to the downstream aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub header: MessageHeader,
    pub entity_id: String,
    pub entity_db: String,
    pub payload: Vec<u8>,
}

/// The three pipeline-stage message kinds, dispatched by a single
/// out-sender queue — mirrors `OutSenderQueue.on_message`'s type-switch
/// across `SerializeEntity` / `PackageEntity` / `SendEntity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutSenderPhase {
    SerializeTag(SerializeTagMessage),
    Compress(CompressMessage),
    Send(SendMessage),
}

// ---------------------------------------------------------------------------
// Entity document
// ---------------------------------------------------------------------------

/// A persisted entity document: source-specific payload plus the system
/// fields tracked by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDocument {
    pub id: String,
    pub doc_type: String,
    pub payload: serde_json::Value,
    pub update_date: Option<DateTime<Utc>>,
    pub update_count: i64,
    pub serialized: bool,
    pub sent: bool,
    pub class_id: Option<i64>,
    pub variant_id: Option<i64>,
    pub multi_result: Option<bool>,
    pub rev: i64,
}

impl EntityDocument {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>, payload: serde_json::Value) -> Self {
        EntityDocument {
            id: id.into(),
            doc_type: doc_type.into(),
            payload,
            update_date: None,
            update_count: 0,
            serialized: false,
            sent: false,
            class_id: None,
            variant_id: None,
            multi_result: None,
            rev: 0,
        }
    }

    /// Freshness check per spec §4.G.1: stale if missing `update_date`, not
    /// serialized, or older than `min_seconds_between_updates`.
    pub fn is_stale(&self, now: DateTime<Utc>, min_seconds_between_updates: i64) -> bool {
        if !self.serialized {
            return true;
        }
        match self.update_date {
            None => true,
            Some(updated) => (now - updated).num_seconds() >= min_seconds_between_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_tuple_orders_depth_first() {
        let a = PriorityTuple { depth: 0, priority: 100, timestamp_epoch: 0 };
        let b = PriorityTuple { depth: 1, priority: 1, timestamp_epoch: 0 };
        assert!(a < b);
    }

    #[test]
    fn priority_tuple_orders_priority_when_depth_equal() {
        let a = PriorityTuple { depth: 2, priority: 10, timestamp_epoch: 0 };
        let b = PriorityTuple { depth: 2, priority: 20, timestamp_epoch: 0 };
        assert!(a < b);
    }

    #[test]
    fn priority_tuple_orders_older_timestamp_first_when_tied() {
        let older = PriorityTuple { depth: 0, priority: 0, timestamp_epoch: 100 };
        let newer = PriorityTuple { depth: 0, priority: 0, timestamp_epoch: 200 };
        assert!(older < newer);
    }

    #[test]
    fn document_is_stale_when_never_serialized() {
        let doc = EntityDocument::new("a1", "authors", serde_json::json!({}));
        assert!(doc.is_stale(Utc::now(), 3600));
    }

    #[test]
    fn document_is_fresh_within_window() {
        let mut doc = EntityDocument::new("a1", "authors", serde_json::json!({}));
        doc.serialized = true;
        doc.update_date = Some(Utc::now());
        assert!(!doc.is_stale(Utc::now(), 3600));
    }

    #[test]
    fn document_is_stale_outside_window() {
        let mut doc = EntityDocument::new("a1", "authors", serde_json::json!({}));
        doc.serialized = true;
        doc.update_date = Some(Utc::now() - chrono::Duration::seconds(7200));
        assert!(doc.is_stale(Utc::now(), 3600));
    }
}

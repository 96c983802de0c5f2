use crate::router::Router;
use crate::work_queue::{QueueError, QueueMessage};
use chrono::Utc;
use harvest_protocol::{
    priority, AuthorPhase, ConferencePhase, EntityDocument, FetchMessage, FetchPhase, JournalPhase, MessageHeader,
    PhaseMeta, QueueKind,
};
use harvest_store::Store;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors a concrete source fetcher can raise, ported from the captcha /
/// end-of-iteration / key-lookup taxonomy of spec.md §4.F / §7.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("operation timed out")]
    Timeout,
    #[error("captcha policy set to ignore")]
    IgnoreCaptcha,
    #[error("captcha policy not implemented")]
    UnimplementedCaptcha,
    #[error("end of iteration")]
    EndOfIteration,
    #[error("missing key: {0}")]
    KeyLookup(String),
    #[error("{0}")]
    Other(String),
}

/// A source's fetch function. Real scraping logic (browser automation,
/// HTML parsing) is out of scope here; production adapters implement this
/// against a `TabPool`, tests against a deterministic stub.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, phase: &FetchPhase) -> Result<serde_json::Value, FetchError>;
}

/// The dedup gate shared by every source adapter, ported from
/// `generate_adapter_with_prio`: consults a process-wide seen-IDs set so
/// the same `expected_id` is never scheduled for fetch twice.
#[derive(Default)]
pub struct SeenIds(Mutex<HashSet<String>>);

impl SeenIds {
    pub fn new() -> Self {
        SeenIds::default()
    }

    /// Returns `true` if `id` had not been seen before (and records it),
    /// `false` if it is a duplicate that should be dropped.
    pub fn gate(&self, id: &str) -> bool {
        let mut seen = self.0.lock().unwrap();
        if seen.contains(id) {
            false
        } else {
            seen.insert(id.to_owned());
            true
        }
    }
}

/// One outgoing expansion computed by [`SourceAdapter::prepare_next_phase`]:
/// the phase to fetch next and the priority to send it at.
pub struct NextPhase {
    pub phase: FetchPhase,
    pub priority: i64,
}

/// Per-source behavior: which namespace it owns, how to fetch, and how a
/// freshly fetched document expands into further fetch phases.
pub trait SourceAdapter: Send + Sync {
    fn iface_ref(&self) -> &'static str;
    fn variant_type(&self) -> i64;
    fn fetcher(&self) -> Arc<dyn Fetcher>;

    /// Compute the next wave of fetch phases from a freshly (re-)fetched
    /// document, consulting `seen` to drop anything already in flight.
    /// Ported from `prepare_next_phase`.
    fn prepare_next_phase(&self, phase: &FetchPhase, doc: &EntityDocument, seen: &SeenIds) -> Vec<NextPhase>;
}

/// The shared algorithm every concrete adapter runs through, ported
/// verbatim from `GeneralDataFetcher.fetch_general_data` (spec.md §4.G).
pub async fn fetch_general_data(
    adapter: &dyn SourceAdapter,
    store: &Arc<Store>,
    router: &Arc<Router>,
    seen: &SeenIds,
    header: &MessageHeader,
    phase: FetchPhase,
    min_seconds_between_updates: i64,
) -> Result<(), QueueError> {
    let namespace = adapter.iface_ref();
    let expected_id = phase.expected_id().to_owned();

    let existing = store
        .documents
        .get(namespace, &expected_id)
        .map_err(|e| QueueError::other(e.to_string()))?;

    let now = Utc::now();
    let is_fresh = existing
        .as_ref()
        .map(|d| !d.is_stale(now, min_seconds_between_updates))
        .unwrap_or(false);

    let (doc, refreshed) = if is_fresh {
        (existing.expect("fresh implies present"), false)
    } else {
        let fetcher = adapter.fetcher();
        let fetch_phase = phase.clone();
        let fetched =
            tokio::task::spawn_blocking(move || fetcher.fetch(&fetch_phase))
                .await
                .map_err(|e| QueueError::other(e.to_string()))?;

        let payload = match fetched {
            Ok(payload) => payload,
            Err(FetchError::Timeout) => return Err(QueueError::Timeout),
            Err(FetchError::IgnoreCaptcha) | Err(FetchError::UnimplementedCaptcha) => {
                tracing::warn!(message_id = %header.message_id, "captcha policy skipped page");
                return Ok(());
            }
            Err(FetchError::EndOfIteration) => {
                tracing::error!(message_id = %header.message_id, "end of iteration");
                return Ok(());
            }
            Err(FetchError::KeyLookup(field)) => {
                tracing::error!(message_id = %header.message_id, field, "entity not processable");
                return Ok(());
            }
            Err(FetchError::Other(reason)) => return Err(QueueError::other(reason)),
        };

        let multi_result = phase.meta_multi_result();
        let doc = store
            .documents
            .upsert(namespace, &header.content, &expected_id, payload, Some(multi_result))
            .map_err(|e| QueueError::other(e.to_string()))?;
        (doc, true)
    };

    if refreshed {
        let send_header = MessageHeader::new(
            "SerializeTag",
            format!("SerializeTag_{}", header.message_id),
            header.content.clone(),
            QueueKind::OutSender,
        );
        let mut send_header = send_header;
        send_header.system_message = true;
        let msg = QueueMessage::OutSender(harvest_protocol::OutSenderPhase::SerializeTag(
            harvest_protocol::SerializeTagMessage {
                header: send_header,
                entity_id: expected_id.clone(),
                entity_db: namespace.to_owned(),
                entity_class: adapter.variant_type(),
                entity_variant: adapter.variant_type(),
            },
        ));
        router.send(msg, priority::ENTITY_SERIAL_REQ, 0.0, 0.0).await;
    }

    for next in adapter.prepare_next_phase(&phase, &doc, seen) {
        let message_type = next.phase.message_type().to_owned();
        let next_id = store.stats.next_message_id(&message_type).map_err(|e| QueueError::other(e.to_string()))?;
        let mut next_header = header.clone();
        next_header.message_type = message_type.clone();
        next_header.message_id = format!("{message_type}_{next_id}");
        next_header.content = next.phase.iface_ref().to_owned();
        if next.phase.roll_over_depth() {
            next_header.depth = next_header.depth.saturating_sub(1);
        }
        let msg = QueueMessage::Fetch(FetchMessage { header: next_header, phase: next.phase });
        router.send_later(msg, next.priority, 0.0, 0.0);
    }

    Ok(())
}

/// Seeds an adapter's initial fetch wave, ported from
/// `_start_interface_collectors` (spec.md §4.G): one fetch message per seed
/// at `priority`, each minted a fresh persistent-counter message id.
/// `build_phase` turns a raw seed string into this adapter's `FetchPhase`
/// variant (different per source, hence the caller-supplied closure rather
/// than a method on `SourceAdapter`).
pub async fn start_interface_collectors(
    adapter: &dyn SourceAdapter,
    store: &Arc<Store>,
    router: &Arc<Router>,
    mut seeds: Vec<String>,
    build_phase: impl Fn(&str) -> FetchPhase,
    priority: i64,
    shuffle: bool,
) -> Result<(), QueueError> {
    if shuffle {
        use rand::seq::SliceRandom;
        seeds.shuffle(&mut rand::thread_rng());
    }

    for seed in seeds {
        let phase = build_phase(&seed);
        let message_type = phase.message_type().to_owned();
        let next_id = store.stats.next_message_id(&message_type).map_err(|e| QueueError::other(e.to_string()))?;
        let header = MessageHeader::new(
            message_type.clone(),
            format!("{message_type}_{next_id}"),
            adapter.iface_ref(),
            QueueKind::Scraper,
        );
        let msg = QueueMessage::Fetch(FetchMessage { header, phase });
        router.send(msg, priority, 0.0, 0.0).await;
    }
    Ok(())
}

impl FetchPhase {
    fn meta_multi_result(&self) -> bool {
        match self {
            FetchPhase::Author(p) => p.meta().multi_result,
            FetchPhase::Publication(p) => p.meta().multi_result,
            FetchPhase::Journal(p) => p.meta().multi_result,
            FetchPhase::Conference(p) => p.meta().multi_result,
        }
    }
}

// ---------------------------------------------------------------------------
// Concrete adapters
// ---------------------------------------------------------------------------

/// `authors` namespace. Expands into `FetchCoauthor` phases for every
/// coauthor name listed on the fetched document.
pub struct AuthorAdapter {
    fetcher: Arc<dyn Fetcher>,
}

impl AuthorAdapter {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        AuthorAdapter { fetcher }
    }
}

impl SourceAdapter for AuthorAdapter {
    fn iface_ref(&self) -> &'static str {
        "authors"
    }

    fn variant_type(&self) -> i64 {
        1000
    }

    fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    fn prepare_next_phase(&self, phase: &FetchPhase, doc: &EntityDocument, seen: &SeenIds) -> Vec<NextPhase> {
        // Coauthor expansion only makes sense once, from the FetchAuthor phase.
        if !matches!(phase, FetchPhase::Author(AuthorPhase::FetchAuthor { .. })) {
            return Vec::new();
        }
        let Some(coauthors) = doc.payload.get("coauthors").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        coauthors
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|name| seen.gate(name))
            .map(|name| NextPhase {
                phase: FetchPhase::Author(AuthorPhase::FetchCoauthor {
                    meta: PhaseMeta::new(name),
                    author_name: name.to_owned(),
                }),
                priority: priority::COAUTHOR_REQ,
            })
            .collect()
    }
}

/// `publications` namespace. Expands into coauthor fetches and, depending
/// on the publication's venue kind, a journal- or conference-ranking fetch.
pub struct PublicationAdapter {
    fetcher: Arc<dyn Fetcher>,
}

impl PublicationAdapter {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        PublicationAdapter { fetcher }
    }
}

impl SourceAdapter for PublicationAdapter {
    fn iface_ref(&self) -> &'static str {
        "publications"
    }

    fn variant_type(&self) -> i64 {
        1010
    }

    fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    fn prepare_next_phase(&self, _phase: &FetchPhase, doc: &EntityDocument, seen: &SeenIds) -> Vec<NextPhase> {
        let mut next = Vec::new();

        if let Some(authors) = doc.payload.get("coauthors").and_then(|v| v.as_array()) {
            for name in authors.iter().filter_map(|v| v.as_str()) {
                if seen.gate(name) {
                    next.push(NextPhase {
                        phase: FetchPhase::Author(AuthorPhase::FetchCoauthor {
                            meta: PhaseMeta::new(name),
                            author_name: name.to_owned(),
                        }),
                        priority: priority::COAUTHOR_REQ,
                    });
                }
            }
        }

        if let Some(venue) = doc.payload.get("venue") {
            let kind = venue.get("kind").and_then(|v| v.as_str()).unwrap_or("");
            let name = venue.get("name").and_then(|v| v.as_str()).unwrap_or("");
            if !name.is_empty() && seen.gate(name) {
                match kind {
                    "journal" => next.push(NextPhase {
                        phase: FetchPhase::Journal(JournalPhase::FetchJournalRank {
                            meta: PhaseMeta::new(name),
                            journal_name: name.to_owned(),
                        }),
                        priority: priority::JOURNAL_REQ,
                    }),
                    "conference" => next.push(NextPhase {
                        phase: FetchPhase::Conference(ConferencePhase::FetchConferenceRank {
                            meta: PhaseMeta::new(name),
                            conference_name: name.to_owned(),
                        }),
                        priority: priority::CONFERENCE_REQ,
                    }),
                    _ => {}
                }
            }
        }

        next
    }
}

/// `journals` namespace. A ranking lookup is a leaf in the crawl graph.
pub struct JournalAdapter {
    fetcher: Arc<dyn Fetcher>,
}

impl JournalAdapter {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        JournalAdapter { fetcher }
    }
}

impl SourceAdapter for JournalAdapter {
    fn iface_ref(&self) -> &'static str {
        "journals"
    }

    fn variant_type(&self) -> i64 {
        1030
    }

    fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    fn prepare_next_phase(&self, _phase: &FetchPhase, _doc: &EntityDocument, _seen: &SeenIds) -> Vec<NextPhase> {
        Vec::new()
    }
}

/// `conferences` namespace. A ranking lookup is a leaf in the crawl graph.
pub struct ConferenceAdapter {
    fetcher: Arc<dyn Fetcher>,
}

impl ConferenceAdapter {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        ConferenceAdapter { fetcher }
    }
}

impl SourceAdapter for ConferenceAdapter {
    fn iface_ref(&self) -> &'static str {
        "conferences"
    }

    fn variant_type(&self) -> i64 {
        1040
    }

    fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    fn prepare_next_phase(&self, _phase: &FetchPhase, _doc: &EntityDocument, _seen: &SeenIds) -> Vec<NextPhase> {
        Vec::new()
    }
}

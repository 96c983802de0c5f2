//! Dispatches typed fetch messages to the matching source adapter.
//!
//! Ported from `ScraperQueue.process_message`: bump the per-content fetch
//! counter, then hand the phase to `fetch_general_data` for the adapter that
//! owns its namespace.

use crate::adapter::{fetch_general_data, AuthorAdapter, ConferenceAdapter, JournalAdapter, PublicationAdapter, SeenIds};
use crate::router::Router;
use crate::work_queue::{QueueError, QueueMessage, WorkQueue};
use chrono::Utc;
use harvest_protocol::{FetchPhase, QueueKind};
use harvest_store::Store;
use std::sync::Arc;

/// The process-message destination for every `FetchMessage`. Holds one
/// concrete adapter per source namespace; `on_message` type-switches on the
/// phase's source and delegates to the shared fetch algorithm.
pub struct ScraperQueue {
    store: Arc<Store>,
    router: Arc<Router>,
    seen: SeenIds,
    author: AuthorAdapter,
    publication: PublicationAdapter,
    journal: JournalAdapter,
    conference: ConferenceAdapter,
    min_seconds_between_updates: i64,
    max_buffer_retries: u32,
    retry_time_sec: u64,
}

impl ScraperQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        router: Arc<Router>,
        author: AuthorAdapter,
        publication: PublicationAdapter,
        journal: JournalAdapter,
        conference: ConferenceAdapter,
        min_seconds_between_updates: i64,
        max_buffer_retries: u32,
        retry_time_sec: u64,
    ) -> Self {
        ScraperQueue {
            store,
            router,
            seen: SeenIds::new(),
            author,
            publication,
            journal,
            conference,
            min_seconds_between_updates,
            max_buffer_retries,
            retry_time_sec,
        }
    }

    fn bump_content_counter(&self, content: &str) -> Result<(), QueueError> {
        let next_index = self
            .store
            .stats
            .content_update(content)
            .map_err(|e| QueueError::other(e.to_string()))?
            .map(|(index, _)| index + 1)
            .unwrap_or(1);
        self.store
            .stats
            .set_content_update(content, next_index, Utc::now())
            .map_err(|e| QueueError::other(e.to_string()))
    }
}

#[async_trait::async_trait]
impl WorkQueue for ScraperQueue {
    fn name(&self) -> QueueKind {
        QueueKind::Scraper
    }

    fn max_buffer_retries(&self) -> u32 {
        self.max_buffer_retries
    }

    fn retry_time_sec(&self) -> u64 {
        self.retry_time_sec
    }

    async fn on_message(&self, msg: QueueMessage) -> Result<(), QueueError> {
        let QueueMessage::Fetch(fetch) = msg else {
            return Err(QueueError::other("scraper queue received a non-fetch message"));
        };

        self.bump_content_counter(&fetch.header.content)?;

        match &fetch.phase {
            FetchPhase::Author(_) => {
                fetch_general_data(
                    &self.author,
                    &self.store,
                    &self.router,
                    &self.seen,
                    &fetch.header,
                    fetch.phase,
                    self.min_seconds_between_updates,
                )
                .await
            }
            FetchPhase::Publication(_) => {
                fetch_general_data(
                    &self.publication,
                    &self.store,
                    &self.router,
                    &self.seen,
                    &fetch.header,
                    fetch.phase,
                    self.min_seconds_between_updates,
                )
                .await
            }
            FetchPhase::Journal(_) => {
                fetch_general_data(
                    &self.journal,
                    &self.store,
                    &self.router,
                    &self.seen,
                    &fetch.header,
                    fetch.phase,
                    self.min_seconds_between_updates,
                )
                .await
            }
            FetchPhase::Conference(_) => {
                fetch_general_data(
                    &self.conference,
                    &self.store,
                    &self.router,
                    &self.seen,
                    &fetch.header,
                    fetch.phase,
                    self.min_seconds_between_updates,
                )
                .await
            }
        }
    }
}

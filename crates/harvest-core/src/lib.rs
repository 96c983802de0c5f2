//! Scheduling, politeness, and pipeline core for the harvester.
//!
//! Ties together the priority queue, message router, politeness controller,
//! tab pool, source adapter framework, scraper queue, delivery pipeline,
//! socket sender, and startup recovery sweep that make up the scheduling
//! layer.

mod adapter;
mod out_sender_queue;
mod politeness;
mod queue;
mod recovery;
mod router;
mod scraper_queue;
mod socket_sender;
mod tab_pool;
mod work_queue;

pub use adapter::{
    fetch_general_data, start_interface_collectors, AuthorAdapter, ConferenceAdapter, FetchError, Fetcher,
    JournalAdapter, NextPhase, PublicationAdapter, SeenIds, SourceAdapter,
};
pub use out_sender_queue::OutSenderQueue;
pub use politeness::PolitenessController;
pub use queue::PriorityQueue;
pub use recovery::recover_unsent_documents;
pub use router::{Router, RouterConfig};
pub use scraper_queue::ScraperQueue;
pub use socket_sender::{SendError, SocketSender};
pub use tab_pool::{BrowserDriver, CaptchaPolicy, TabPool, TabPoolError};
pub use work_queue::{QueueError, QueueMessage, QueueRegistry, WorkQueue};

//! Wiring for the harvester binary: turns a loaded [`config::HarvesterConfig`]
//! into a running `Router` plus its worker queues, tab pool, politeness
//! monitor, and recovery sweep.

pub mod config;

use config::{CaptchaAction, HarvesterConfig};
use harvest_core::{
    start_interface_collectors, AuthorAdapter, BrowserDriver, CaptchaPolicy, ConferenceAdapter, FetchError, Fetcher,
    JournalAdapter, OutSenderQueue, PolitenessController, PublicationAdapter, QueueRegistry, Router, RouterConfig,
    ScraperQueue, SocketSender, TabPool, TabPoolError,
};
use harvest_protocol::{
    priority, AuthorPhase, ConferencePhase, FetchPhase, JournalPhase, PhaseMeta, PublicationPhase, QueueKind,
};
use harvest_store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Concrete fetchers for the four source adapters. Real scraping logic
/// (browser automation, HTML parsing) lives outside this crate; production
/// deployments supply their own `Fetcher` implementations here.
pub struct Fetchers {
    pub author: Arc<dyn Fetcher>,
    pub publication: Arc<dyn Fetcher>,
    pub journal: Arc<dyn Fetcher>,
    pub conference: Arc<dyn Fetcher>,
}

/// A driver stand-in that always fails. Wired in by default so the binary
/// links and runs end-to-end (tab pool, politeness, recovery, pipeline)
/// without a real WebDriver backend; swap in a real `BrowserDriver` before
/// deploying against a live source.
pub struct UnimplementedDriver;

impl BrowserDriver for UnimplementedDriver {
    fn open_tab(&mut self) -> Result<String, TabPoolError> {
        Err(TabPoolError::Driver("no browser driver configured".to_owned()))
    }
    fn switch_to(&mut self, _window_handle: &str) -> Result<(), TabPoolError> {
        Err(TabPoolError::Driver("no browser driver configured".to_owned()))
    }
    fn navigate(&mut self, _url: &str) -> Result<(), TabPoolError> {
        Err(TabPoolError::Driver("no browser driver configured".to_owned()))
    }
    fn page_source(&mut self) -> Result<String, TabPoolError> {
        Err(TabPoolError::Driver("no browser driver configured".to_owned()))
    }
    fn dismiss_alert_if_present(&mut self) -> Result<(), TabPoolError> {
        Ok(())
    }
    fn current_url(&mut self) -> Result<String, TabPoolError> {
        Err(TabPoolError::Driver("no browser driver configured".to_owned()))
    }
    fn quit(&mut self) -> Result<(), TabPoolError> {
        Ok(())
    }
    fn restart(&mut self) -> Result<(), TabPoolError> {
        Ok(())
    }
}

/// A fetcher stand-in matching `UnimplementedDriver`.
pub struct UnimplementedFetcher;

impl Fetcher for UnimplementedFetcher {
    fn fetch(&self, _phase: &FetchPhase) -> Result<serde_json::Value, FetchError> {
        Err(FetchError::Other("no fetcher configured for this source".to_owned()))
    }
}

impl Default for Fetchers {
    fn default() -> Self {
        Fetchers {
            author: Arc::new(UnimplementedFetcher),
            publication: Arc::new(UnimplementedFetcher),
            journal: Arc::new(UnimplementedFetcher),
            conference: Arc::new(UnimplementedFetcher),
        }
    }
}

fn captcha_policy_from_config(action: CaptchaAction) -> CaptchaPolicy {
    match action {
        CaptchaAction::Ignore => CaptchaPolicy::Ignore,
        CaptchaAction::WaitUser => CaptchaPolicy::WaitUser,
        CaptchaAction::Bypass => CaptchaPolicy::Bypass,
    }
}

/// Every long-lived piece wired up and ready to run.
pub struct Harvester {
    pub store: Arc<Store>,
    pub router: Arc<Router>,
    pub politeness: Arc<PolitenessController>,
    pub tab_pool: Arc<TabPool>,
    pub sender: Arc<SocketSender>,
    author_adapter: Arc<AuthorAdapter>,
    publication_adapter: Arc<PublicationAdapter>,
    journal_adapter: Arc<JournalAdapter>,
    conference_adapter: Arc<ConferenceAdapter>,
    config: HarvesterConfig,
}

impl Harvester {
    pub fn build(config: HarvesterConfig, driver: Box<dyn BrowserDriver>, fetchers: Fetchers) -> Result<Arc<Self>, harvest_store::StoreError> {
        let store = Arc::new(Store::open(std::path::Path::new(&config.store.sqlite_path))?);

        let politeness = Arc::new(PolitenessController::new(
            config.politeness.min_wait_secs,
            config.politeness.max_wait_secs,
            config.politeness.ban_penalty_secs,
            store.clone(),
        ));

        let url_timeout = config.tab_pool.url_timeout_secs.map(Duration::from_secs_f64);
        let captcha_policy = captcha_policy_from_config(config.tab_pool.captcha_action);
        let tab_pool = Arc::new(
            TabPool::new(driver, config.tab_pool.max_tabs, politeness.clone(), captcha_policy, url_timeout)
                .map_err(|e| harvest_store::StoreError::IntegrityCheckFailed(e.to_string()))?,
        );

        let sender = Arc::new(SocketSender::new(config.aggregator.host.clone(), config.aggregator.port));

        let router_config = RouterConfig {
            max_active_threads: config.scheduler.max_active_threads,
            worktime_cap: config.scheduler.worktime_cap_minutes.map(|m| Duration::from_secs(m * 60)),
            debug_delay: config.scheduler.debug_delay,
            max_depth: config.scheduler.max_depth,
        };

        // `Router::new` takes an empty registry; queue implementations need
        // a handle back to the router to emit follow-on messages, so they
        // are registered in a second pass once the `Arc<Router>` exists.
        let router = Router::new(QueueRegistry::new(), router_config);

        // Adapters are built twice from the same (cheaply-cloned) `Arc<dyn
        // Fetcher>`: one set is moved into the scraper queue to answer fetch
        // messages, the other is kept here so `run` can seed each source's
        // initial wave via `start_interface_collectors` independently of the
        // queue's own lifecycle.
        let author_adapter = Arc::new(AuthorAdapter::new(fetchers.author.clone()));
        let publication_adapter = Arc::new(PublicationAdapter::new(fetchers.publication.clone()));
        let journal_adapter = Arc::new(JournalAdapter::new(fetchers.journal.clone()));
        let conference_adapter = Arc::new(ConferenceAdapter::new(fetchers.conference.clone()));

        let scraper_queue = Arc::new(ScraperQueue::new(
            store.clone(),
            router.clone(),
            AuthorAdapter::new(fetchers.author),
            PublicationAdapter::new(fetchers.publication),
            JournalAdapter::new(fetchers.journal),
            ConferenceAdapter::new(fetchers.conference),
            config.scheduler.min_seconds_between_updates,
            config.scheduler.max_buffer_retries,
            config.scheduler.retry_time_sec,
        ));
        let out_sender_queue = Arc::new(OutSenderQueue::new(
            store.clone(),
            router.clone(),
            sender.clone(),
            config.scheduler.max_buffer_retries,
            config.scheduler.retry_time_sec,
        ));
        router.register(QueueKind::Scraper, scraper_queue);
        router.register(QueueKind::OutSender, out_sender_queue);

        Ok(Arc::new(Harvester {
            store,
            router,
            politeness,
            tab_pool,
            sender,
            author_adapter,
            publication_adapter,
            journal_adapter,
            conference_adapter,
            config,
        }))
    }

    /// Spawn the dispatcher, politeness monitor, and per-source seed
    /// collectors as background tasks, and run the recovery sweep if
    /// enabled. Returns once recovery completes; the spawned tasks keep
    /// running for the life of the process.
    pub async fn run(self: &Arc<Self>) {
        if self.config.recovery.enabled {
            if let Err(e) = harvest_core::recover_unsent_documents(&self.store, &self.sender).await {
                tracing::error!(error = %e, "recovery sweep failed");
            }
        }

        if self.config.politeness.auto_adaptive {
            tokio::spawn(self.politeness.clone().run_monitor());
        }

        self.spawn_seed_collector(
            self.author_adapter.clone(),
            "authors",
            self.config.seeds.authors.clone(),
            priority::AUTHOR_REQ,
            |seed| {
                FetchPhase::Author(AuthorPhase::FetchAuthor { meta: PhaseMeta::new(seed), author_name: seed.to_owned() })
            },
        );
        self.spawn_seed_collector(
            self.publication_adapter.clone(),
            "publications",
            self.config.seeds.publications.clone(),
            priority::PUB_REQ,
            |seed| {
                FetchPhase::Publication(PublicationPhase::FetchPublication {
                    meta: PhaseMeta::new(seed),
                    publication_id: seed.to_owned(),
                })
            },
        );
        self.spawn_seed_collector(
            self.journal_adapter.clone(),
            "journals",
            self.config.seeds.journals.clone(),
            priority::JOURNAL_REQ,
            |seed| {
                FetchPhase::Journal(JournalPhase::FetchJournalRank {
                    meta: PhaseMeta::new(seed),
                    journal_name: seed.to_owned(),
                })
            },
        );
        self.spawn_seed_collector(
            self.conference_adapter.clone(),
            "conferences",
            self.config.seeds.conferences.clone(),
            priority::CONFERENCE_REQ,
            |seed| {
                FetchPhase::Conference(ConferencePhase::FetchConferenceRank {
                    meta: PhaseMeta::new(seed),
                    conference_name: seed.to_owned(),
                })
            },
        );

        self.router.clone().run().await;
    }

    /// Spawns one background task seeding `adapter`'s initial fetch wave
    /// from `seeds`, unless `interface_name` is absent from
    /// `scheduler.interfaces_enabled`. One task per source adapter, matching
    /// how the scraper keeps each source's crawl independent.
    fn spawn_seed_collector<A>(
        self: &Arc<Self>,
        adapter: Arc<A>,
        interface_name: &'static str,
        seeds: Vec<String>,
        priority: i64,
        build_phase: impl Fn(&str) -> FetchPhase + Send + 'static,
    ) where
        A: harvest_core::SourceAdapter + 'static,
    {
        if !self.config.scheduler.interfaces_enabled.iter().any(|i| i == interface_name) {
            return;
        }
        if seeds.is_empty() {
            return;
        }

        let store = self.store.clone();
        let router = self.router.clone();
        let shuffle = self.config.scheduler.shuffle_roots;

        tokio::spawn(async move {
            if let Err(e) =
                start_interface_collectors(adapter.as_ref(), &store, &router, seeds, build_phase, priority, shuffle)
                    .await
            {
                tracing::error!(interface = interface_name, error = %e, "failed to seed interface collector");
            }
        });
    }

    /// Run only the recovery sweep, without starting the dispatcher —
    /// the `recover-only` CLI mode.
    pub async fn recover_only(&self) -> Result<(), harvest_store::StoreError> {
        harvest_core::recover_unsent_documents(&self.store, &self.sender).await
    }
}

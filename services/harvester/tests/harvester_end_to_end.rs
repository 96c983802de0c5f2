//! End-to-end scenarios: config → wired `Harvester` → dispatcher → pipeline
//! → delivery to a stand-in aggregator socket, exercised through the public
//! API only (no access to crate-internal types).

use harvest_core::Fetcher;
use harvest_test_utils::{FakeDriver, ScriptedFetcher};
use harvester::config::{
    AggregatorConfig, CaptchaAction, HarvesterConfig, PolitenessConfig, RecoveryConfig, SchedulerConfig, SeedsConfig,
    StoreConfig, TabPoolConfig,
};
use harvester::{Fetchers, Harvester};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Accepts connections forever, counting each one as one delivered entity.
/// Standing in for the downstream aggregator in spec.md §6.
async fn spawn_counting_aggregator() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let counter = count_clone.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncReadExt;
                let mut buf = Vec::new();
                let _ = socket.read_to_end(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    (addr, count)
}

fn base_config(sqlite_path: String, aggregator: AggregatorConfig, seeds: SeedsConfig, interfaces: Vec<String>) -> HarvesterConfig {
    HarvesterConfig {
        schema_version: 1,
        store: StoreConfig { sqlite_path },
        aggregator,
        scheduler: SchedulerConfig {
            max_active_threads: 4,
            max_depth: None,
            min_seconds_between_updates: 3600,
            worktime_cap_minutes: None,
            debug_delay: false,
            max_buffer_retries: 1,
            retry_time_sec: 1,
            shuffle_roots: false,
            interfaces_enabled: interfaces,
        },
        politeness: PolitenessConfig {
            min_wait_secs: 0.0,
            max_wait_secs: 0.0,
            ban_penalty_secs: 2.0,
            ban_phrase: "unusual traffic".to_owned(),
            auto_adaptive: false,
        },
        tab_pool: TabPoolConfig { max_tabs: 1, url_timeout_secs: None, captcha_action: CaptchaAction::Ignore },
        recovery: RecoveryConfig { enabled: false },
        seeds,
        favored_org: None,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn no_seeds_configured_runs_without_fetching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let sqlite_path = dir.path().join("harvest.sqlite3").to_string_lossy().to_string();
    let (addr, deliveries) = spawn_counting_aggregator().await;

    let config = base_config(
        sqlite_path,
        AggregatorConfig { host: addr.ip().to_string(), port: addr.port(), status_port: None },
        SeedsConfig::default(),
        vec!["authors".to_owned(), "publications".to_owned(), "journals".to_owned(), "conferences".to_owned()],
    );

    let harvester = Harvester::build(config, Box::new(FakeDriver::new()), Fetchers::default()).unwrap();
    let running = harvester.clone();
    tokio::spawn(async move { running.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    assert_eq!(harvester.router.queue_len(), 0);
}

#[tokio::test]
async fn single_seeded_author_is_fetched_serialized_and_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let sqlite_path = dir.path().join("harvest.sqlite3").to_string_lossy().to_string();
    let (addr, deliveries) = spawn_counting_aggregator().await;

    let author_fetcher = Arc::new(ScriptedFetcher::new());
    author_fetcher.script_ok("Ada Lovelace", serde_json::json!({"coauthors": []}));

    let config = base_config(
        sqlite_path,
        AggregatorConfig { host: addr.ip().to_string(), port: addr.port(), status_port: None },
        SeedsConfig { authors: vec!["Ada Lovelace".to_owned()], ..SeedsConfig::default() },
        vec!["authors".to_owned()],
    );

    let fetchers = Fetchers {
        author: author_fetcher.clone() as Arc<dyn Fetcher>,
        publication: Arc::new(ScriptedFetcher::new()),
        journal: Arc::new(ScriptedFetcher::new()),
        conference: Arc::new(ScriptedFetcher::new()),
    };

    let harvester = Harvester::build(config, Box::new(FakeDriver::new()), fetchers).unwrap();
    let running = harvester.clone();
    tokio::spawn(async move { running.run().await });

    let delivered = wait_until(|| deliveries.load(Ordering::SeqCst) >= 1, Duration::from_secs(5)).await;
    assert!(delivered, "entity was never delivered to the aggregator");

    let doc = harvester.store.documents.get("authors", "Ada Lovelace").unwrap().unwrap();
    assert!(doc.serialized);
    assert!(doc.sent);
}

#[tokio::test]
async fn coauthor_expansion_delivers_both_entities_without_duplicate_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let sqlite_path = dir.path().join("harvest.sqlite3").to_string_lossy().to_string();
    let (addr, deliveries) = spawn_counting_aggregator().await;

    let author_fetcher = Arc::new(ScriptedFetcher::new());
    author_fetcher.script_ok("Ada Lovelace", serde_json::json!({"coauthors": ["Charles Babbage"]}));
    author_fetcher.script_ok("Charles Babbage", serde_json::json!({"coauthors": ["Ada Lovelace"]}));

    let config = base_config(
        sqlite_path,
        AggregatorConfig { host: addr.ip().to_string(), port: addr.port(), status_port: None },
        SeedsConfig { authors: vec!["Ada Lovelace".to_owned()], ..SeedsConfig::default() },
        vec!["authors".to_owned()],
    );

    let fetchers = Fetchers {
        author: author_fetcher.clone() as Arc<dyn Fetcher>,
        publication: Arc::new(ScriptedFetcher::new()),
        journal: Arc::new(ScriptedFetcher::new()),
        conference: Arc::new(ScriptedFetcher::new()),
    };

    let harvester = Harvester::build(config, Box::new(FakeDriver::new()), fetchers).unwrap();
    let running = harvester.clone();
    tokio::spawn(async move { running.run().await });

    // Ada's coauthor list names Charles, and Charles's names Ada right back;
    // the scraper queue's seen-ids gate must stop that from cycling forever.
    let both_delivered = wait_until(|| deliveries.load(Ordering::SeqCst) >= 2, Duration::from_secs(5)).await;
    assert!(both_delivered, "both author and coauthor should reach the aggregator");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 2, "the back-reference to Ada must not be re-fetched as a duplicate");

    let ada = harvester.store.documents.get("authors", "Ada Lovelace").unwrap().unwrap();
    let charles = harvester.store.documents.get("authors", "Charles Babbage").unwrap().unwrap();
    assert!(ada.sent);
    assert!(charles.sent);
}

//! Harvester configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/rusty-timer/harvester.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `store.sqlite_path`
//! - `aggregator.host`, `aggregator.port`

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (deserialized from TOML)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub schema_version: u32,
    pub store: StoreConfig,
    pub aggregator: AggregatorConfig,
    pub scheduler: SchedulerConfig,
    pub politeness: PolitenessConfig,
    pub tab_pool: TabPoolConfig,
    pub recovery: RecoveryConfig,
    pub seeds: SeedsConfig,
    /// Tie-break hint when multiple author matches are found; consulted
    /// by fetcher implementations, which live outside this crate.
    pub favored_org: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub host: String,
    pub port: u16,
    /// Health/status endpoint port. Not served by this crate (the status
    /// surface is out of scope per spec.md §1); stored so a deployment's
    /// own status server can read it out of the loaded config.
    pub status_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_active_threads: usize,
    pub max_depth: Option<u32>,
    pub min_seconds_between_updates: i64,
    pub worktime_cap_minutes: Option<u64>,
    pub debug_delay: bool,
    pub max_buffer_retries: u32,
    pub retry_time_sec: u64,
    pub shuffle_roots: bool,
    pub interfaces_enabled: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    pub min_wait_secs: f64,
    pub max_wait_secs: f64,
    pub ban_penalty_secs: f64,
    pub ban_phrase: String,
    pub auto_adaptive: bool,
}

#[derive(Debug, Clone)]
pub struct TabPoolConfig {
    pub max_tabs: u32,
    pub url_timeout_secs: Option<f64>,
    pub captcha_action: CaptchaAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaAction {
    Ignore,
    WaitUser,
    Bypass,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
}

/// Root seeds to start each source adapter's initial fetch wave from
/// (`_start_interface_collectors`, spec.md §4.G). Which of these actually
/// run is gated by `scheduler.interfaces_enabled`.
#[derive(Debug, Clone, Default)]
pub struct SeedsConfig {
    pub authors: Vec<String>,
    pub publications: Vec<String>,
    pub journals: Vec<String>,
    pub conferences: Vec<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    favored_org: Option<String>,
    store: Option<RawStoreConfig>,
    aggregator: Option<RawAggregatorConfig>,
    scheduler: Option<RawSchedulerConfig>,
    politeness: Option<RawPolitenessConfig>,
    tab_pool: Option<RawTabPoolConfig>,
    recovery: Option<RawRecoveryConfig>,
    seeds: Option<RawSeedsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAggregatorConfig {
    host: Option<String>,
    port: Option<u16>,
    status_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawSchedulerConfig {
    max_active_threads: Option<usize>,
    max_depth: Option<u32>,
    min_seconds_between_updates: Option<i64>,
    worktime_cap_minutes: Option<u64>,
    debug_delay: Option<bool>,
    max_buffer_retries: Option<u32>,
    retry_time_sec: Option<u64>,
    shuffle_roots: Option<bool>,
    interfaces_enabled: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawPolitenessConfig {
    min_wait_secs: Option<f64>,
    max_wait_secs: Option<f64>,
    ban_penalty_secs: Option<f64>,
    ban_phrase: Option<String>,
    auto_adaptive: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTabPoolConfig {
    max_tabs: Option<u32>,
    url_timeout_secs: Option<f64>,
    captcha_action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecoveryConfig {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSeedsConfig {
    authors: Option<Vec<String>>,
    publications: Option<Vec<String>>,
    journals: Option<Vec<String>>,
    conferences: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<HarvesterConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<HarvesterConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/rusty-timer/harvester.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<HarvesterConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw.schema_version.ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!("schema_version must be 1, got {}", schema_version)));
    }

    let raw_store = raw.store.ok_or_else(|| ConfigError::MissingField("store".to_owned()))?;
    let sqlite_path = raw_store.sqlite_path.ok_or_else(|| ConfigError::MissingField("store.sqlite_path".to_owned()))?;

    let raw_aggregator = raw.aggregator.ok_or_else(|| ConfigError::MissingField("aggregator".to_owned()))?;
    let host = raw_aggregator.host.ok_or_else(|| ConfigError::MissingField("aggregator.host".to_owned()))?;
    let port = raw_aggregator.port.ok_or_else(|| ConfigError::MissingField("aggregator.port".to_owned()))?;
    let status_port = raw_aggregator.status_port;

    fn default_interfaces_enabled() -> Vec<String> {
        vec!["authors".to_owned(), "publications".to_owned(), "journals".to_owned(), "conferences".to_owned()]
    }

    let scheduler = match raw.scheduler {
        Some(s) => SchedulerConfig {
            max_active_threads: s.max_active_threads.unwrap_or(8),
            max_depth: s.max_depth,
            min_seconds_between_updates: s.min_seconds_between_updates.unwrap_or(3600),
            worktime_cap_minutes: s.worktime_cap_minutes,
            debug_delay: s.debug_delay.unwrap_or(false),
            max_buffer_retries: s.max_buffer_retries.unwrap_or(3),
            retry_time_sec: s.retry_time_sec.unwrap_or(5),
            shuffle_roots: s.shuffle_roots.unwrap_or(false),
            interfaces_enabled: s.interfaces_enabled.unwrap_or_else(default_interfaces_enabled),
        },
        None => SchedulerConfig {
            max_active_threads: 8,
            max_depth: None,
            min_seconds_between_updates: 3600,
            worktime_cap_minutes: None,
            debug_delay: false,
            max_buffer_retries: 3,
            retry_time_sec: 5,
            shuffle_roots: false,
            interfaces_enabled: default_interfaces_enabled(),
        },
    };

    let politeness = match raw.politeness {
        Some(p) => PolitenessConfig {
            min_wait_secs: p.min_wait_secs.unwrap_or(2.0),
            max_wait_secs: p.max_wait_secs.unwrap_or(5.0),
            ban_penalty_secs: p.ban_penalty_secs.unwrap_or(10.0),
            ban_phrase: p.ban_phrase.unwrap_or_else(|| "unusual traffic".to_owned()),
            auto_adaptive: p.auto_adaptive.unwrap_or(true),
        },
        None => PolitenessConfig {
            min_wait_secs: 2.0,
            max_wait_secs: 5.0,
            ban_penalty_secs: 10.0,
            ban_phrase: "unusual traffic".to_owned(),
            auto_adaptive: true,
        },
    };

    let tab_pool = match raw.tab_pool {
        Some(t) => TabPoolConfig {
            max_tabs: t.max_tabs.unwrap_or(4),
            url_timeout_secs: t.url_timeout_secs,
            captcha_action: parse_captcha_action(t.captcha_action)?,
        },
        None => TabPoolConfig { max_tabs: 4, url_timeout_secs: None, captcha_action: CaptchaAction::Ignore },
    };

    let recovery = match raw.recovery {
        Some(r) => RecoveryConfig { enabled: r.enabled.unwrap_or(true) },
        None => RecoveryConfig { enabled: true },
    };

    let seeds = match raw.seeds {
        Some(s) => SeedsConfig {
            authors: s.authors.unwrap_or_default(),
            publications: s.publications.unwrap_or_default(),
            journals: s.journals.unwrap_or_default(),
            conferences: s.conferences.unwrap_or_default(),
        },
        None => SeedsConfig::default(),
    };

    Ok(HarvesterConfig {
        schema_version,
        store: StoreConfig { sqlite_path },
        aggregator: AggregatorConfig { host, port, status_port },
        scheduler,
        politeness,
        tab_pool,
        recovery,
        seeds,
        favored_org: raw.favored_org,
    })
}

fn parse_captcha_action(raw: Option<String>) -> Result<CaptchaAction, ConfigError> {
    match raw.as_deref() {
        None => Ok(CaptchaAction::Ignore),
        Some("IGNORE") => Ok(CaptchaAction::Ignore),
        Some("WAIT_USER") => Ok(CaptchaAction::WaitUser),
        Some("BYPASS") => Ok(CaptchaAction::Bypass),
        Some(other) => Err(ConfigError::InvalidValue(format!(
            "tab_pool.captcha_action must be one of IGNORE, WAIT_USER, BYPASS, got '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "io error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "parse error: {msg}"),
            ConfigError::MissingField(field) => write!(f, "missing required field: {field}"),
            ConfigError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            schema_version = 1

            [store]
            sqlite_path = "/var/lib/rusty-timer/harvester.sqlite3"

            [aggregator]
            host = "aggregator.internal"
            port = 9000
        "#
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let cfg = load_config_from_str(sample_toml()).unwrap();
        assert_eq!(cfg.aggregator.host, "aggregator.internal");
        assert_eq!(cfg.aggregator.port, 9000);
        assert_eq!(cfg.scheduler.max_active_threads, 8);
        assert_eq!(cfg.politeness.ban_phrase, "unusual traffic");
        assert!(cfg.recovery.enabled);
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let toml_str = r#"
            schema_version = 2
            [store]
            sqlite_path = "x"
            [aggregator]
            host = "x"
            port = 1
        "#;
        assert!(matches!(load_config_from_str(toml_str), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn rejects_missing_aggregator_section() {
        let toml_str = r#"
            schema_version = 1
            [store]
            sqlite_path = "x"
        "#;
        assert!(matches!(load_config_from_str(toml_str), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn scheduler_overrides_apply() {
        let toml_str = r#"
            schema_version = 1
            [store]
            sqlite_path = "x"
            [aggregator]
            host = "x"
            port = 1
            [scheduler]
            max_active_threads = 16
            max_depth = 12
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.scheduler.max_active_threads, 16);
        assert_eq!(cfg.scheduler.max_depth, Some(12));
    }

    #[test]
    fn defaults_cover_captcha_interfaces_and_seeds() {
        let cfg = load_config_from_str(sample_toml()).unwrap();
        assert_eq!(cfg.tab_pool.captcha_action, CaptchaAction::Ignore);
        assert_eq!(cfg.tab_pool.url_timeout_secs, None);
        assert!(cfg.politeness.auto_adaptive);
        assert_eq!(
            cfg.scheduler.interfaces_enabled,
            vec!["authors", "publications", "journals", "conferences"]
        );
        assert!(cfg.seeds.authors.is_empty());
        assert_eq!(cfg.aggregator.status_port, None);
        assert_eq!(cfg.favored_org, None);
    }

    #[test]
    fn rejects_unknown_captcha_action() {
        let toml_str = r#"
            schema_version = 1
            [store]
            sqlite_path = "x"
            [aggregator]
            host = "x"
            port = 1
            [tab_pool]
            captcha_action = "NOPE"
        "#;
        assert!(matches!(load_config_from_str(toml_str), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn parses_seeds_and_interfaces_enabled() {
        let toml_str = r#"
            schema_version = 1
            favored_org = "State University"
            [store]
            sqlite_path = "x"
            [aggregator]
            host = "x"
            port = 1
            status_port = 9100
            [scheduler]
            interfaces_enabled = ["authors"]
            shuffle_roots = true
            [tab_pool]
            captcha_action = "WAIT_USER"
            url_timeout_secs = 30.0
            [seeds]
            authors = ["alice", "bob"]
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.scheduler.interfaces_enabled, vec!["authors"]);
        assert!(cfg.scheduler.shuffle_roots);
        assert_eq!(cfg.tab_pool.captcha_action, CaptchaAction::WaitUser);
        assert_eq!(cfg.tab_pool.url_timeout_secs, Some(30.0));
        assert_eq!(cfg.seeds.authors, vec!["alice".to_owned(), "bob".to_owned()]);
        assert_eq!(cfg.aggregator.status_port, Some(9100));
        assert_eq!(cfg.favored_org.as_deref(), Some("State University"));
    }
}

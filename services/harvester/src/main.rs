use clap::{Arg, Command};
use harvester::config;
use harvester::{Fetchers, Harvester, UnimplementedDriver};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "harvester starting");

    let matches = Command::new("Rusty Timer: Metadata Harvester")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Crawls academic metadata sources and forwards documents to the aggregator")
        .arg(
            Arg::new("config")
                .help("Path to the harvester TOML config file")
                .short('c')
                .long("config")
                .value_name("path")
                .default_value("/etc/rusty-timer/harvester.toml"),
        )
        .subcommand(Command::new("run").about("Runs the scheduler, dispatcher, and recovery sweep"))
        .subcommand(Command::new("recover-only").about("Runs the recovery sweep only, then exits"))
        .get_matches();

    let config_path = matches.get_one::<String>("config").expect("has default value");
    let cfg = match config::load_config_from_path(std::path::Path::new(config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path, "failed to load config");
            std::process::exit(1);
        }
    };

    // Real browser automation and HTML scraping live outside this crate;
    // production deployments supply their own `BrowserDriver`/`Fetcher`
    // implementations in place of these stand-ins.
    let harvester = match Harvester::build(cfg, Box::new(UnimplementedDriver), Fetchers::default()) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "failed to build harvester");
            std::process::exit(1);
        }
    };

    match matches.subcommand() {
        Some(("recover-only", _)) => {
            if let Err(e) = harvester.recover_only().await {
                tracing::error!(error = %e, "recovery sweep failed");
                std::process::exit(1);
            }
        }
        _ => harvester.run().await,
    }
}

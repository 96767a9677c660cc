//! Entry point for the loader CLI.

use anyhow::{Context, Result};
use appsload::config::{LoaderConfig, MarkPolicy, ShardTarget};
use appsload::driver::BatchDriver;
use appsload::retry::RetryPolicy;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "appsload",
    about = "Load installed-apps logs into device-type sharded memcached",
    long_about = r#"Load installed-apps logs into device-type sharded memcached

Examples:
    # Load every pending file with the default shard layout
    appsload --pattern '/data/appsinstalled/*.tsv.gz'

    # Custom shards, and only mark files whose error rate passed
    appsload --pattern 'logs/*.tsv.gz' --shard idfa=10.0.0.1:11211 --shard gaid=10.0.0.2:11211 --require-accepted

    # Parse and log records without writing them
    appsload --pattern 'logs/*.tsv.gz' --dry

Logging:
    Use the RUST_LOG environment variable to configure the desired logging level.
    For example:

    RUST_LOG=appsload=debug appsload --pattern 'logs/*.tsv.gz'
"#,
    version
)]
struct Config {
    /// Glob pattern selecting the input files
    #[arg(long, env = "APPSLOAD_PATTERN", default_value = "/data/appsinstalled/*.tsv.gz")]
    pattern: String,

    /// Shard binding `device_type=host:port`; repeat for every shard
    #[arg(
        long = "shard",
        env = "APPSLOAD_SHARDS",
        value_delimiter = ',',
        default_values = [
            "idfa=127.0.0.1:33013",
            "gaid=127.0.0.1:33014",
            "adid=127.0.0.1:33015",
            "dvid=127.0.0.1:33016",
        ]
    )]
    shards: Vec<ShardTarget>,

    /// Write attempts per record, including the first one
    #[arg(long, env = "APPSLOAD_ATTEMPTS", default_value_t = 5)]
    attempts: u32,

    /// Pause between two write attempts, in milliseconds
    #[arg(long, env = "APPSLOAD_RETRY_DELAY_MS", default_value_t = 200)]
    retry_delay_ms: u64,

    /// Network timeout of a single write attempt, in milliseconds
    #[arg(long, env = "APPSLOAD_TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,

    /// A file whose error rate reaches this value is reported as a failed load
    #[arg(long, env = "APPSLOAD_ERROR_THRESHOLD", default_value_t = 0.01)]
    error_threshold: f64,

    /// Maximum number of files processed at the same time [default: number of CPUs]
    #[arg(long, short = 'w', env = "APPSLOAD_WORKERS")]
    workers: Option<usize>,

    /// Parser stages per file [default: number of shards]
    #[arg(long, env = "APPSLOAD_PARSERS")]
    parsers: Option<usize>,

    /// Capacity of each pipeline queue [default: number of shards]
    #[arg(long, env = "APPSLOAD_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// Prefix added to a file name once it has been processed
    #[arg(long, env = "APPSLOAD_MARKER_PREFIX", default_value = ".")]
    marker_prefix: String,

    /// Only mark files whose error rate was acceptable
    #[arg(long, env = "APPSLOAD_REQUIRE_ACCEPTED")]
    require_accepted: bool,

    /// Log records instead of writing them to memcached
    #[arg(long)]
    dry: bool,

    /// Write logs to this file instead of stdout
    #[arg(long, env = "APPSLOAD_LOG")]
    log: Option<PathBuf>,

    /// Save a JSON report of the run to this file
    #[arg(long, env = "APPSLOAD_REPORT")]
    report: Option<PathBuf>,
}

impl Config {
    fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::new(
            self.pattern.clone(),
            self.shards.iter().cloned().collect(),
        );
        config.retry = RetryPolicy::new(self.attempts, Duration::from_millis(self.retry_delay_ms));
        config.store_timeout = Duration::from_millis(self.timeout_ms);
        config.error_threshold = self.error_threshold;
        if let Some(workers) = self.workers {
            config.max_concurrent_files = workers;
        }
        if let Some(parsers) = self.parsers {
            config.parser_workers = parsers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        config.marker_prefix = self.marker_prefix.clone();
        config.mark_policy = if self.require_accepted {
            MarkPolicy::AcceptedOnly
        } else {
            MarkPolicy::Always
        };
        config.dry_run = self.dry;
        config
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let default_level = if config.dry { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stdout).init(),
    }
    Ok(())
}

fn run(config: &Config) -> Result<()> {
    let driver = BatchDriver::from_config(config.loader_config())?;
    info!(config = ?driver.config(), "loader started");
    let report = driver.run()?;
    if let Some(path) = &config.report {
        report.save_to_file(path)?;
        info!(path = %path.display(), "report saved");
    }
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::parse();
    if let Err(e) = init_logging(&config) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "loader aborted");
            ExitCode::FAILURE
        }
    }
}

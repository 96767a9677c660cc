//! Loader configuration.
//!
//! A [`LoaderConfig`] is built once at startup (usually from the command line),
//! validated, and then shared read-only with every file being processed. There is
//! no process-wide mutable state: the shard table, retry policy and error budget
//! all travel inside this struct.
//!
//! # Example
//!
//! ```
//! use appsload::config::{LoaderConfig, ShardMap};
//!
//! let shards: ShardMap = "idfa=127.0.0.1:33013,gaid=127.0.0.1:33014".parse()?;
//! let config = LoaderConfig::new("/data/appsinstalled/*.tsv.gz", shards);
//! config.validate()?;
//! assert_eq!(config.retry.max_attempts, 5);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::retry::RetryPolicy;
use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Error rate at or above which a file is considered a failed load.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.01;

/// Per-attempt network timeout for store writes.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// File name prefix marking a file as already processed.
pub const DEFAULT_MARKER_PREFIX: &str = ".";

/// One device-type label bound to the address of the store holding its records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShardTarget {
    pub label: String,
    pub address: String,
}

impl FromStr for ShardTarget {
    type Err = anyhow::Error;

    /// Parses `label=host:port`.
    fn from_str(s: &str) -> Result<Self> {
        let Some((label, address)) = s.split_once('=') else {
            bail!("shard binding must look like label=host:port, got {s:?}");
        };
        let (label, address) = (label.trim(), address.trim());
        if label.is_empty() || address.is_empty() {
            bail!("shard binding has an empty label or address: {s:?}");
        }
        Ok(Self {
            label: label.to_string(),
            address: address.to_string(),
        })
    }
}

impl fmt::Display for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.address)
    }
}

/// The fixed set of known shards, keyed by device-type label.
///
/// Iteration order is the lexicographic order of the labels, so stage
/// creation and log output are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardMap {
    targets: BTreeMap<String, String>,
}

impl ShardMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `label` to `address`, replacing any earlier binding for the label.
    pub fn insert(&mut self, label: impl Into<String>, address: impl Into<String>) {
        self.targets.insert(label.into(), address.into());
    }

    /// Whether `label` is a configured device type.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.targets.contains_key(label)
    }

    #[must_use]
    pub fn address(&self, label: &str) -> Option<&str> {
        self.targets.get(label).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// All bindings as [`ShardTarget`] values, in label order.
    pub fn targets(&self) -> impl Iterator<Item = ShardTarget> + '_ {
        self.targets.iter().map(|(label, address)| ShardTarget {
            label: label.clone(),
            address: address.clone(),
        })
    }
}

impl FromIterator<ShardTarget> for ShardMap {
    fn from_iter<I: IntoIterator<Item = ShardTarget>>(iter: I) -> Self {
        let mut map = Self::new();
        for target in iter {
            map.insert(target.label, target.address);
        }
        map
    }
}

impl FromStr for ShardMap {
    type Err = anyhow::Error;

    /// Parses a comma-separated list of `label=host:port` bindings.
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse::<ShardTarget>)
            .collect()
    }
}

/// Whether completion markers depend on the per-file verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum MarkPolicy {
    /// Mark every file that was opened and streamed, whatever its error rate.
    #[default]
    Always,
    /// Mark only files whose outcome was accepted by the error budget.
    AcceptedOnly,
}

/// Immutable loader configuration shared by the batch driver and every file.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Device-type label to store address bindings.
    pub shards: ShardMap,
    /// Glob pattern selecting the input files.
    pub pattern: String,
    /// Per-record write retry policy.
    pub retry: RetryPolicy,
    /// A file is accepted when its error rate is strictly below this value.
    pub error_threshold: f64,
    /// Per-attempt network timeout for a single store write.
    pub store_timeout: Duration,
    /// Capacity of the intake queue and of each per-shard outbound queue.
    pub queue_capacity: usize,
    /// Number of parser stages per file.
    pub parser_workers: usize,
    /// Upper bound on the number of files processed at the same time.
    pub max_concurrent_files: usize,
    /// Prefix applied to a file name once the file has been processed.
    pub marker_prefix: String,
    pub mark_policy: MarkPolicy,
    /// Log records instead of writing them to the stores.
    pub dry_run: bool,
}

impl LoaderConfig {
    /// Configuration with default tuning for the given pattern and shards.
    ///
    /// One parser stage is started per shard, and queues hold one slot per shard.
    #[must_use]
    pub fn new(pattern: impl Into<String>, shards: ShardMap) -> Self {
        let per_shard = shards.len().max(1);
        Self {
            shards,
            pattern: pattern.into(),
            retry: RetryPolicy::default(),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            queue_capacity: per_shard,
            parser_workers: per_shard,
            max_concurrent_files: num_cpus::get().max(1),
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            mark_policy: MarkPolicy::default(),
            dry_run: false,
        }
    }

    /// Check the configuration for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern, shard table or marker prefix is empty,
    /// if the threshold is outside `(0, 1]`, or if any count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.pattern.trim().is_empty() {
            bail!("empty file pattern");
        }
        if self.shards.is_empty() {
            bail!("no shards configured");
        }
        if !(self.error_threshold > 0.0 && self.error_threshold <= 1.0) {
            bail!(
                "error threshold must be in (0, 1], got {}",
                self.error_threshold
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry policy needs at least one attempt");
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }
        if self.parser_workers == 0 {
            bail!("at least one parser worker is required");
        }
        if self.max_concurrent_files == 0 {
            bail!("max concurrent files must be at least 1");
        }
        if self.marker_prefix.is_empty() {
            bail!("empty completion marker prefix");
        }
        Ok(())
    }
}

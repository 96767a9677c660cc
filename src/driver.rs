//! Batch driver: discovers input files, processes them concurrently, and marks
//! them as done.
//!
//! Files are processed on a dedicated rayon pool of at most
//! [`LoaderConfig::max_concurrent_files`] threads. Each file gets its own
//! orchestrator with its own stage threads and store connections; two files
//! running at the same time may therefore write to the same shard through
//! separate connections.
//!
//! Completion markers are applied only after every file has finished, in the
//! same lexicographic order the files were discovered in.
//!
//! ```no_run
//! use appsload::config::LoaderConfig;
//! use appsload::driver::BatchDriver;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = LoaderConfig::new("/data/appsinstalled/*.tsv.gz", "idfa=127.0.0.1:33013".parse()?);
//! let report = BatchDriver::from_config(config)?.run()?;
//! report.save_to_file("load-report.json")?;
//! # Ok(())
//! # }
//! ```

use crate::config::{LoaderConfig, MarkPolicy};
use crate::io::glob::{discover, mark_processed};
use crate::orchestrator::{FileOrchestrator, FileReport, FileStatus};
use crate::store::{DryRunConnector, MemcacheConnector, StoreConnector};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// One processed file and where it ended up.
#[derive(Clone, Debug, Serialize)]
pub struct BatchEntry {
    #[serde(flatten)]
    pub file: FileReport,
    /// Path after the completion marker was applied, if it was.
    pub marked_as: Option<PathBuf>,
}

/// Result of one batch run, in processing order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<BatchEntry>,
}

impl BatchReport {
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.count(|status| matches!(status, FileStatus::Completed { outcome } if outcome.accepted))
    }

    /// Files that were read but did not pass the error budget or were cut short.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.count(|status| {
            !matches!(status, FileStatus::Aborted { .. })
                && !matches!(status, FileStatus::Completed { outcome } if outcome.accepted)
        })
    }

    #[must_use]
    pub fn aborted(&self) -> usize {
        self.count(|status| matches!(status, FileStatus::Aborted { .. }))
    }

    #[must_use]
    pub fn marked(&self) -> usize {
        self.files.iter().filter(|e| e.marked_as.is_some()).count()
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|e| pred(&e.file.status)).count()
    }

    /// Write the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("serialize batch report")?;
        let mut file =
            File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

/// Runs one batch over everything the configured pattern matches.
pub struct BatchDriver {
    config: Arc<LoaderConfig>,
    connector: Arc<dyn StoreConnector>,
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchDriver {
    /// Driver writing through `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: LoaderConfig, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        config.validate().context("invalid loader configuration")?;
        Ok(Self {
            config: Arc::new(config),
            connector,
        })
    }

    /// Driver writing to memcached, or logging only when `dry_run` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn from_config(config: LoaderConfig) -> Result<Self> {
        let connector: Arc<dyn StoreConnector> = if config.dry_run {
            Arc::new(DryRunConnector)
        } else {
            Arc::new(MemcacheConnector::new(config.store_timeout))
        };
        Self::new(config, connector)
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Unmarked files matching the pattern, in processing order.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is empty or the glob expansion fails.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        discover(&self.config.pattern, &self.config.marker_prefix)
    }

    /// Process every pending file, then apply completion markers.
    ///
    /// Per-file problems never fail the batch; they are reported in the
    /// returned [`BatchReport`].
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the worker pool cannot be built.
    pub fn run(&self) -> Result<BatchReport> {
        let files = self.discover()?;
        info!(
            pattern = %self.config.pattern,
            files = files.len(),
            workers = self.config.max_concurrent_files,
            "starting batch"
        );
        if files.is_empty() {
            return Ok(BatchReport::default());
        }

        let threads = self.config.max_concurrent_files.min(files.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("file-{i}"))
            .build()
            .context("build file worker pool")?;

        let config = self.config.as_ref();
        let connector = self.connector.as_ref();
        let reports: Vec<FileReport> = pool.install(|| {
            files
                .par_iter()
                .map(|path| FileOrchestrator::new(path, config, connector).run())
                .collect()
        });

        let files = reports
            .into_iter()
            .map(|file| {
                let marked_as = self.mark(&file);
                BatchEntry { file, marked_as }
            })
            .collect();
        let report = BatchReport { files };
        info!(
            accepted = report.accepted(),
            rejected = report.rejected(),
            aborted = report.aborted(),
            marked = report.marked(),
            "batch finished"
        );
        Ok(report)
    }

    fn should_mark(&self, status: &FileStatus) -> bool {
        match (self.config.mark_policy, status) {
            (_, FileStatus::Aborted { .. }) => false,
            (MarkPolicy::Always, _) => true,
            (MarkPolicy::AcceptedOnly, FileStatus::Completed { outcome }) => outcome.accepted,
            (MarkPolicy::AcceptedOnly, FileStatus::Incomplete { .. }) => false,
        }
    }

    fn mark(&self, file: &FileReport) -> Option<PathBuf> {
        if !self.should_mark(&file.status) {
            info!(file = %file.path.display(), "leaving file unmarked");
            return None;
        }
        match mark_processed(&file.path, &self.config.marker_prefix) {
            Ok(target) => {
                info!(file = %file.path.display(), to = %target.display(), "marked file as processed");
                Some(target)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "cannot mark file as processed");
                None
            }
        }
    }
}

//! File orchestrator: drives one input file through the pipeline.
//!
//! ```text
//!             intake (bounded)            per-shard queues (bounded)
//! reader ──▶ [ lines ] ──▶ parser × N ──▶ [ idfa ] ──▶ writer(idfa) ──▶ store
//!                                    └──▶ [ gaid ] ──▶ writer(gaid) ──▶ store
//!                                    └──▶ ...
//! ```
//!
//! The orchestrator moves forward through
//! `Opening → Streaming → Draining → Aggregating → Done` and never back.
//! Shutdown is two-phase at each hop: close the queue, then join its consumers.
//! The intake is closed first and the parsers joined; only then are the shard
//! queues closed and the writers joined, so no parsed record is left behind.

use crate::budget::{ErrorBudget, FileOutcome};
use crate::config::LoaderConfig;
use crate::io::compression::auto_detect_reader;
use crate::parser::{ParserReport, ParserStage};
use crate::router::ShardRouter;
use crate::store::StoreConnector;
use crate::writer::{WriterReport, WriterStage};
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, bounded};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;
use tracing::{Span, debug, error, info, info_span, warn};

/// Lifecycle of one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FileState {
    Opening,
    Streaming,
    Draining,
    Aggregating,
    Done,
}

/// How processing of a file ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// The file could not be opened or its decoder set up; nothing was read.
    Aborted { reason: String },
    /// Every line was read and the pipeline drained.
    Completed { outcome: FileOutcome },
    /// Reading stopped early or a stage died; the outcome covers what was read.
    Incomplete { outcome: FileOutcome, reason: String },
}

impl FileStatus {
    #[must_use]
    pub fn outcome(&self) -> Option<&FileOutcome> {
        match self {
            Self::Aborted { .. } => None,
            Self::Completed { outcome } | Self::Incomplete { outcome, .. } => Some(outcome),
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.accepted)
    }
}

/// Everything known about one file once its orchestrator is done.
#[derive(Clone, Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub parsers: Vec<ParserReport>,
    pub writers: Vec<WriterReport>,
    pub elapsed_ms: u64,
}

/// Result of the streaming phase.
struct Streamed {
    lines: u64,
    interrupted: Option<String>,
}

/// Drives one file end to end.
pub struct FileOrchestrator<'a> {
    path: PathBuf,
    config: &'a LoaderConfig,
    connector: &'a dyn StoreConnector,
    state: FileState,
}

impl std::fmt::Debug for FileOrchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOrchestrator")
            .field("path", &self.path)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> FileOrchestrator<'a> {
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        config: &'a LoaderConfig,
        connector: &'a dyn StoreConnector,
    ) -> Self {
        Self {
            path: path.into(),
            config,
            connector,
            state: FileState::Opening,
        }
    }

    #[must_use]
    pub fn state(&self) -> FileState {
        self.state
    }

    fn advance(&mut self, next: FileState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "file state");
        self.state = next;
    }

    /// Process the file and report how it went. Never fails: problems with the
    /// file itself end up in [`FileStatus`].
    pub fn run(mut self) -> FileReport {
        let started = Instant::now();
        let span = info_span!("file", path = %self.path.display());
        let _enter = span.enter();
        info!("processing file");

        let reader = match open_input(&self.path) {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %format!("{e:#}"), "cannot open input, skipping file");
                self.advance(FileState::Done);
                return FileReport {
                    path: self.path,
                    status: FileStatus::Aborted {
                        reason: format!("{e:#}"),
                    },
                    parsers: Vec::new(),
                    writers: Vec::new(),
                    elapsed_ms: elapsed_ms(started),
                };
            }
        };

        let (streamed, parsers, writers, stage_failure) = self.pipeline(reader);

        self.advance(FileState::Aggregating);
        let mut budget = ErrorBudget::new(self.config.error_threshold);
        for report in &parsers {
            budget.add_parser(report);
        }
        for report in &writers {
            budget.add_writer(report);
        }
        let outcome = budget.outcome(streamed.lines);

        self.advance(FileState::Done);
        log_outcome(&outcome, self.config.error_threshold);
        let status = match streamed.interrupted.or(stage_failure) {
            None => FileStatus::Completed { outcome },
            Some(reason) => {
                warn!(%reason, "file was not fully processed");
                FileStatus::Incomplete { outcome, reason }
            }
        };

        FileReport {
            path: self.path,
            status,
            parsers,
            writers,
            elapsed_ms: elapsed_ms(started),
        }
    }

    /// Streaming and draining. Returns the stream summary, every stage report
    /// that could be collected, and the first stage failure if any.
    fn pipeline(
        &mut self,
        reader: Box<dyn Read>,
    ) -> (Streamed, Vec<ParserReport>, Vec<WriterReport>, Option<String>) {
        let config = self.config;
        let connector = self.connector;
        let span = Span::current();

        thread::scope(|s| {
            let shards = Arc::new(config.shards.clone());
            let (router, queues) = ShardRouter::build(&shards, config.queue_capacity);
            let (intake_tx, intake_rx) = bounded::<String>(config.queue_capacity);
            let mut failures = Vec::new();

            let mut writer_handles = Vec::with_capacity(queues.len());
            for queue in queues {
                let store = connector.connect(&queue.target);
                let stage = WriterStage::new(queue.target.label.clone(), store, config.retry);
                let name = format!("write-{}", queue.target.label);
                match spawn_stage(s, &name, &span, move || stage.run(queue.receiver)) {
                    Ok(handle) => writer_handles.push((name, handle)),
                    Err(e) => failures.push(format!("{e:#}")),
                }
            }

            let mut parser_handles = Vec::with_capacity(config.parser_workers);
            for worker in 0..config.parser_workers {
                let stage = ParserStage::new(worker, Arc::clone(&shards), router.clone());
                let intake = intake_rx.clone();
                let name = format!("parse-{worker}");
                match spawn_stage(s, &name, &span, move || stage.run(intake)) {
                    Ok(handle) => parser_handles.push((name, handle)),
                    Err(e) => failures.push(format!("{e:#}")),
                }
            }
            drop(intake_rx);

            self.advance(FileState::Streaming);
            let streamed = stream_lines(reader, &intake_tx);
            debug!(lines = streamed.lines, "input exhausted");

            self.advance(FileState::Draining);
            drop(intake_tx);
            let parsers = join_stages(parser_handles, &mut failures);
            drop(router);
            let writers = join_stages(writer_handles, &mut failures);

            (streamed, parsers, writers, failures.into_iter().next())
        })
    }
}

/// Open and decompress `path`. Decoders parse their header lazily, so the first
/// block is pulled here: a file that is not in the format it claims fails now
/// rather than half way through streaming.
fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let decoder =
        auto_detect_reader(file, path).with_context(|| format!("decompress {}", path.display()))?;
    let mut reader = BufReader::new(decoder);
    reader
        .fill_buf()
        .with_context(|| format!("decompress {}", path.display()))?;
    Ok(Box::new(reader))
}

/// Push every line of `reader` onto the intake queue, counting lines read.
///
/// Lines are split on `\n` with a trailing `\r` removed; bytes that are not valid
/// UTF-8 are replaced rather than failing the stream.
fn stream_lines(reader: Box<dyn Read>, intake: &Sender<String>) -> Streamed {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let mut line = &buf[..];
                if let Some(rest) = line.strip_suffix(b"\n") {
                    line = rest;
                }
                if let Some(rest) = line.strip_suffix(b"\r") {
                    line = rest;
                }
                lines += 1;
                if intake.send(String::from_utf8_lossy(line).into_owned()).is_err() {
                    return Streamed {
                        lines,
                        interrupted: Some("no parser stage is accepting lines".to_string()),
                    };
                }
            }
            Err(e) => {
                error!(error = %e, lines, "read failed, stopping input");
                return Streamed {
                    lines,
                    interrupted: Some(format!("read failed after {lines} lines: {e}")),
                };
            }
        }
    }

    Streamed {
        lines,
        interrupted: None,
    }
}

fn spawn_stage<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: &str,
    span: &Span,
    body: F,
) -> Result<ScopedJoinHandle<'scope, T>>
where
    T: Send + 'scope,
    F: FnOnce() -> T + Send + 'scope,
{
    let span = span.clone();
    thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, move || {
            let _enter = span.enter();
            body()
        })
        .with_context(|| format!("spawn stage {name}"))
}

fn join_stages<T>(
    handles: Vec<(String, ScopedJoinHandle<'_, T>)>,
    failures: &mut Vec<String>,
) -> Vec<T> {
    let mut reports = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.join().map_err(|_| anyhow!("stage {name} panicked")) {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(error = %e, "stage lost");
                failures.push(e.to_string());
            }
        }
    }
    reports
}

fn log_outcome(outcome: &FileOutcome, threshold: f64) {
    if outcome.processed_count == 0 {
        info!("empty file, nothing to load");
    } else if outcome.accepted {
        info!(
            lines = outcome.processed_count,
            errors = outcome.error_count,
            error_rate = outcome.error_rate,
            "acceptable error rate, successful load"
        );
    } else {
        error!(
            lines = outcome.processed_count,
            errors = outcome.error_count,
            error_rate = outcome.error_rate,
            threshold,
            "high error rate, failed load"
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

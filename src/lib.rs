//! # appsload
//!
//! A **bulk loader** for "installed applications per device" logs. It reads
//! compressed, tab-separated files and writes one compact binary record per
//! device into a memcached instance chosen by the device type.
//!
//! ## Input format
//!
//! Each line has exactly five tab-separated fields:
//!
//! ```text
//! device_type  device_id  lat  lon  app_id,app_id,...
//! idfa         1rfw452y   55.55  42.42  1423,43,567
//! ```
//!
//! The record is stored under `device_type:device_id` as a `postcard`-encoded
//! [`UserApps`] value.
//!
//! ## Pipeline
//!
//! For every input file:
//! 1. The [`orchestrator`] opens and decompresses the file and streams its lines
//!    onto a bounded intake queue
//! 2. [`parser`] stages validate and encode lines and hand them to the
//!    [`router`], which has one bounded queue per shard
//! 3. One [`writer`] stage per shard drains its queue into that shard's store,
//!    retrying each record under a fixed [`RetryPolicy`]
//! 4. The [`budget`] turns the stage error counts into a [`FileOutcome`]
//!
//! The [`driver`] discovers files, runs a bounded number of them at once and
//! renames each processed file with a completion marker so a later run skips it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use appsload::{BatchDriver, LoaderConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let shards = "idfa=127.0.0.1:33013,gaid=127.0.0.1:33014".parse()?;
//! let config = LoaderConfig::new("/data/appsinstalled/*.tsv.gz", shards);
//! let report = BatchDriver::from_config(config)?.run()?;
//! println!("{} file(s) accepted", report.accepted());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `compression-gzip` - gzip input (default)
//! - `compression-zstd`, `compression-bzip2`, `compression-xz` - other codecs (default)

pub mod budget;
pub mod config;
pub mod driver;
pub mod io;
pub mod orchestrator;
pub mod parser;
pub mod record;
pub mod retry;
pub mod router;
pub mod store;
pub mod testing;
pub mod writer;

pub use budget::{ErrorBudget, FileOutcome};
pub use config::{LoaderConfig, MarkPolicy, ShardMap, ShardTarget};
pub use driver::{BatchDriver, BatchEntry, BatchReport};
pub use orchestrator::{FileOrchestrator, FileReport, FileState, FileStatus};
pub use parser::{ParseError, ParserReport, ParserStage, parse_line};
pub use record::{EncodedRecord, ParsedRecord, UserApps};
pub use retry::RetryPolicy;
pub use router::ShardRouter;
pub use store::{KvStore, MemcacheConnector, StoreConnector, StoreError};
pub use writer::{WriterReport, WriterStage};

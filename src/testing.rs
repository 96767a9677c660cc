//! Testing utilities for loader pipelines.
//!
//! This module provides doubles and fixtures for exercising the loader without
//! a running memcached:
//!
//! - **Store doubles**: [`MemoryConnector`] records every write,
//!   [`FailingConnector`] fails every attempt, [`FlakyConnector`] fails the
//!   first few attempts of each record
//! - **Fixtures**: [`InputDir`] sandboxes, [`write_lines`] to create
//!   (compressed) input files, [`sample_lines`] and [`line`] to build input
//!
//! # Quick Start
//!
//! ```no_run
//! use appsload::config::LoaderConfig;
//! use appsload::driver::BatchDriver;
//! use appsload::testing::*;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = InputDir::new()?;
//! write_lines(dir.file("20170929000000.tsv.gz"), &sample_lines())?;
//!
//! let store = MemoryConnector::new();
//! let config = LoaderConfig::new(dir.pattern("*.tsv.gz"), default_shards());
//! let report = BatchDriver::new(config, Arc::new(store.clone()))?.run()?;
//!
//! assert_eq!(report.accepted(), 1);
//! assert_eq!(store.writes_for("idfa").len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mock_store;

pub use fixtures::*;
pub use mock_store::*;

//! Key-value store boundary.
//!
//! Writer stages only ever need one operation: set a key to a byte value within a
//! bounded time. [`KvStore`] is that operation; [`StoreConnector`] creates one
//! store per shard for every file being processed, so a connection is owned by
//! exactly one writer stage.

pub mod memcache;

use crate::config::ShardTarget;
use crate::record::UserApps;
use crate::retry::Retryable;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use memcache::MemcacheStore;

/// Failure of a single store write attempt.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out talking to {address}")]
    Timeout { address: String },
    #[error("i/o error talking to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("{address} rejected the write: {reply}")]
    Rejected { address: String, reply: String },
    #[error("invalid key {0:?}")]
    InvalidKey(String),
}

impl StoreError {
    /// Classify an I/O error raised while talking to `address`.
    pub(crate) fn from_io(address: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout {
                address: address.to_string(),
            },
            _ => Self::Io {
                address: address.to_string(),
                source,
            },
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidKey(_))
    }
}

/// A connection to one shard's store.
pub trait KvStore: Send {
    /// Set `key` to `value`. Each call is one attempt, bounded by the store's
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on network failure, timeout or rejection.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Address used in log messages.
    fn address(&self) -> &str;
}

/// Creates the store used by one shard's writer stage.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore>;
}

/// Connects to memcached servers with a fixed per-attempt timeout.
#[derive(Clone, Copy, Debug)]
pub struct MemcacheConnector {
    pub timeout: Duration,
}

impl MemcacheConnector {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl StoreConnector for MemcacheConnector {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore> {
        Box::new(MemcacheStore::new(&target.address, self.timeout))
    }
}

/// Logs every record instead of writing it.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunConnector;

impl StoreConnector for DryRunConnector {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore> {
        Box::new(DryRunStore {
            address: target.address.clone(),
        })
    }
}

#[derive(Debug)]
struct DryRunStore {
    address: String,
}

impl KvStore for DryRunStore {
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        match UserApps::decode(value) {
            Ok(apps) => debug!(address = %self.address, key, ?apps, "dry run set"),
            Err(_) => debug!(address = %self.address, key, bytes = value.len(), "dry run set"),
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

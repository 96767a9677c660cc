//! In-process store doubles.

use crate::config::ShardTarget;
use crate::store::{KvStore, StoreConnector, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Writes = Arc<Mutex<BTreeMap<String, Vec<(String, Vec<u8>)>>>>;

/// Records every successful write, grouped by shard label.
///
/// Clones share the same record, so keep one clone to inspect after handing
/// another to the loader.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    writes: Writes,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, value)` pairs written to the shard `label`, in write order.
    #[must_use]
    pub fn writes_for(&self, label: &str) -> Vec<(String, Vec<u8>)> {
        let writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes.get(label).cloned().unwrap_or_default()
    }

    /// Number of writes across all shards.
    #[must_use]
    pub fn total_writes(&self) -> usize {
        let writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes.values().map(Vec::len).sum()
    }

    fn store(&self, target: &ShardTarget) -> MemoryStore {
        MemoryStore {
            label: target.label.clone(),
            address: target.address.clone(),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore> {
        Box::new(self.store(target))
    }
}

#[derive(Debug)]
struct MemoryStore {
    label: String,
    address: String,
    writes: Writes,
}

impl KvStore for MemoryStore {
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes
            .entry(self.label.clone())
            .or_default()
            .push((key.to_string(), value.to_vec()));
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Every attempt times out. Counts attempts across all of its stores.
#[derive(Clone, Debug, Default)]
pub struct FailingConnector {
    attempts: Arc<AtomicU64>,
}

impl FailingConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StoreConnector for FailingConnector {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore> {
        Box::new(FailingStore {
            address: target.address.clone(),
            attempts: Arc::clone(&self.attempts),
        })
    }
}

#[derive(Debug)]
struct FailingStore {
    address: String,
    attempts: Arc<AtomicU64>,
}

impl KvStore for FailingStore {
    fn set(&mut self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Timeout {
            address: self.address.clone(),
        })
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Fails the first `failures_per_key` attempts for every key, then stores it in
/// the wrapped [`MemoryConnector`].
#[derive(Clone, Debug)]
pub struct FlakyConnector {
    failures_per_key: u32,
    attempts: Arc<AtomicU64>,
    inner: MemoryConnector,
}

impl FlakyConnector {
    #[must_use]
    pub fn new(failures_per_key: u32) -> Self {
        Self {
            failures_per_key,
            attempts: Arc::default(),
            inner: MemoryConnector::new(),
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The writes that eventually went through.
    #[must_use]
    pub fn stored(&self) -> &MemoryConnector {
        &self.inner
    }
}

impl StoreConnector for FlakyConnector {
    fn connect(&self, target: &ShardTarget) -> Box<dyn KvStore> {
        Box::new(FlakyStore {
            failures_per_key: self.failures_per_key,
            failed: HashMap::new(),
            attempts: Arc::clone(&self.attempts),
            inner: self.inner.store(target),
        })
    }
}

#[derive(Debug)]
struct FlakyStore {
    failures_per_key: u32,
    failed: HashMap<String, u32>,
    attempts: Arc<AtomicU64>,
    inner: MemoryStore,
}

impl KvStore for FlakyStore {
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self.failed.entry(key.to_string()).or_default();
        if *failed < self.failures_per_key {
            *failed += 1;
            return Err(StoreError::Io {
                address: self.inner.address.clone(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
            });
        }
        self.inner.set(key, value)
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

//! Writer stage: drains one shard's queue into that shard's store.

use crate::record::EncodedRecord;
use crate::retry::RetryPolicy;
use crate::store::KvStore;
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{debug, error};

/// Final counters published by a writer stage when its queue is exhausted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriterReport {
    pub shard: String,
    pub written: u64,
    pub failed: u64,
}

/// Sole owner of one shard's store connection for the duration of a file.
pub struct WriterStage {
    shard: String,
    store: Box<dyn KvStore>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for WriterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterStage")
            .field("shard", &self.shard)
            .field("address", &self.store.address())
            .field("policy", &self.policy)
            .finish()
    }
}

impl WriterStage {
    #[must_use]
    pub fn new(shard: impl Into<String>, store: Box<dyn KvStore>, policy: RetryPolicy) -> Self {
        Self {
            shard: shard.into(),
            store,
            policy,
        }
    }

    /// Write one record, retrying under the policy. Returns whether it was stored.
    pub fn write(&mut self, record: &EncodedRecord) -> bool {
        let store = &mut self.store;
        match self.policy.run(|_| store.set(&record.key, &record.payload)) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    shard = %self.shard,
                    address = %self.store.address(),
                    key = %record.key,
                    attempts = e.attempts,
                    error = %e.source,
                    "store write failed"
                );
                false
            }
        }
    }

    /// Write records until the queue is closed and empty.
    pub fn run(mut self, queue: Receiver<EncodedRecord>) -> WriterReport {
        let mut report = WriterReport {
            shard: self.shard.clone(),
            ..WriterReport::default()
        };
        for record in queue {
            if self.write(&record) {
                report.written += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(
            shard = %report.shard,
            written = report.written,
            failed = report.failed,
            "writer stage finished"
        );
        report
    }
}

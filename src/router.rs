//! Shard routing: one bounded outbound queue per device type.
//!
//! The router owns the sending half of every per-shard queue. Parser stages each
//! hold a clone; a shard's queue closes once the orchestrator and every parser
//! have dropped their router, which is what lets the writer stages drain and
//! finish.

use crate::config::{ShardMap, ShardTarget};
use crate::record::EncodedRecord;
use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashMap;
use std::sync::Arc;

/// Receiving end of one shard's queue, handed to that shard's writer stage.
#[derive(Debug)]
pub struct ShardQueue {
    pub target: ShardTarget,
    pub receiver: Receiver<EncodedRecord>,
}

/// Static device-type → queue mapping, built once per file.
#[derive(Clone, Debug)]
pub struct ShardRouter {
    routes: Arc<HashMap<String, Sender<EncodedRecord>>>,
}

impl ShardRouter {
    /// Create one queue of `capacity` slots per configured shard.
    #[must_use]
    pub fn build(shards: &ShardMap, capacity: usize) -> (Self, Vec<ShardQueue>) {
        let mut routes = HashMap::with_capacity(shards.len());
        let mut queues = Vec::with_capacity(shards.len());
        for target in shards.targets() {
            let (tx, rx) = bounded(capacity);
            routes.insert(target.label.clone(), tx);
            queues.push(ShardQueue {
                target,
                receiver: rx,
            });
        }
        (
            Self {
                routes: Arc::new(routes),
            },
            queues,
        )
    }

    /// Send `record` to the queue of its shard, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard is not configured, or if its writer stage is
    /// gone and the queue is disconnected.
    pub fn route(&self, record: EncodedRecord) -> Result<()> {
        let tx = self
            .routes
            .get(&record.shard)
            .ok_or_else(|| anyhow!("no route for shard {:?}", record.shard))?;
        tx.send(record)
            .map_err(|e| anyhow!("writer for shard {:?} is gone", e.0.shard))
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.routes.contains_key(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(shard: &str) -> EncodedRecord {
        EncodedRecord {
            shard: shard.to_string(),
            key: format!("{shard}:1"),
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn routes_by_device_type() {
        let shards: ShardMap = "idfa=a:1,gaid=b:2".parse().unwrap();
        let (router, queues) = ShardRouter::build(&shards, 4);
        router.route(record("idfa")).unwrap();
        router.route(record("idfa")).unwrap();
        router.route(record("gaid")).unwrap();

        let count = |label: &str| {
            queues
                .iter()
                .find(|q| q.target.label == label)
                .map(|q| q.receiver.len())
                .unwrap()
        };
        assert_eq!(count("idfa"), 2);
        assert_eq!(count("gaid"), 1);
        assert!(router.contains("idfa") && router.contains("gaid"));
        assert!(!router.contains("dvid"));
    }

    #[test]
    fn unknown_shard_is_an_error() {
        let shards: ShardMap = "idfa=a:1".parse().unwrap();
        let (router, _queues) = ShardRouter::build(&shards, 1);
        assert!(router.route(record("dvid")).is_err());
    }

    #[test]
    fn dropping_every_router_closes_queues() {
        let shards: ShardMap = "idfa=a:1".parse().unwrap();
        let (router, queues) = ShardRouter::build(&shards, 1);
        let clone = router.clone();
        drop(router);
        clone.route(record("idfa")).unwrap();
        drop(clone);
        let rx = &queues[0].receiver;
        assert!(rx.recv().is_ok());
        assert!(rx.recv().is_err());
    }
}

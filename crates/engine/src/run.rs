//! In-flight run bookkeeping
//!
//! The scheduler tracks every in-flight interpreter run in an arena of
//! nodes addressed by a stable key. Nodes are inserted when a run is
//! spawned and removed when it finishes; retries re-insert the same fact
//! under a fresh key with a bumped attempt count.

use accrete_core::{Fact, IncrementId, StampKey};
use std::collections::HashMap;

/// One in-flight (or retried) interpreter run
#[derive(Debug, Clone)]
pub struct RunNode {
    /// The fact being run
    pub fact: Fact,
    /// The durably written trigger stamp
    pub trigger: StampKey,
    /// Record id of the parent increment; singularity for roots
    pub parent: IncrementId,
    /// 1-based attempt counter
    pub attempt: u32,
}

/// Arena of in-flight runs addressed by a stable key
#[derive(Debug, Default)]
pub struct RunArena {
    next: u64,
    nodes: HashMap<u64, RunNode>,
}

impl RunArena {
    /// An empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its key
    pub fn insert(&mut self, node: RunNode) -> u64 {
        let key = self.next;
        self.next += 1;
        self.nodes.insert(key, node);
        key
    }

    /// The node behind a key, if still in flight
    pub fn get(&self, key: u64) -> Option<&RunNode> {
        self.nodes.get(&key)
    }

    /// Remove and return a finished node
    pub fn remove(&mut self, key: u64) -> Option<RunNode> {
        self.nodes.remove(&key)
    }

    /// Number of in-flight runs
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

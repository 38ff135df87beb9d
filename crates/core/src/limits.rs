//! Runtime tuning knobs
//!
//! One plain struct with safe defaults, validated once at construction of
//! the components that consume it.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default maximum interpreter runs per fact
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default bound on `update` calls within one run
pub const DEFAULT_UPDATE_BUDGET: u32 = 100_000;

/// Default bound on the reverse history scan during retrieval
pub const DEFAULT_HISTORY_SCAN_DEPTH: usize = 64;

/// Default staleness window for the benign-race heuristic (~pi seconds)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(3_141);

/// Default batch size for the asynchronous persistence queue
pub const DEFAULT_WRITE_QUEUE_BATCH: usize = 128;

/// Tuning knobs shared by the interpreter, data engine, and scheduler
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Maximum interpreter runs per fact before it is dropped
    pub max_attempts: u32,
    /// Maximum `update` calls within one run; exhaustion fails the run
    pub update_budget: u32,
    /// Maximum repository history entries inspected on a cache miss
    pub history_scan_depth: usize,
    /// Recorded ids older than this are screened as benign races
    pub stale_after: Duration,
    /// Maximum stamps persisted per writer batch
    pub write_queue_batch: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        RuntimeLimits {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            update_budget: DEFAULT_UPDATE_BUDGET,
            history_scan_depth: DEFAULT_HISTORY_SCAN_DEPTH,
            stale_after: DEFAULT_STALE_AFTER,
            write_queue_batch: DEFAULT_WRITE_QUEUE_BATCH,
        }
    }
}

impl RuntimeLimits {
    /// Check that every knob is usable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first zero-valued knob.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::exception("max_attempts must be at least 1"));
        }
        if self.update_budget == 0 {
            return Err(Error::exception("update_budget must be at least 1"));
        }
        if self.history_scan_depth == 0 {
            return Err(Error::exception("history_scan_depth must be at least 1"));
        }
        if self.write_queue_batch == 0 {
            return Err(Error::exception("write_queue_batch must be at least 1"));
        }
        Ok(())
    }
}

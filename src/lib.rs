//! Accrete: a deterministic, replayable increment runtime
//!
//! Each unit of work (an *increment*) consumes a triggering fact, runs
//! pure decision logic that may read other entities, and atomically
//! publishes a consistent set of resulting entity versions plus side
//! effects, recording everything needed to replay or audit the
//! computation. Coordination is optimistic and lock-free: concurrent
//! writers share a versioned key space with no central lock service.
//!
//! # Quick start
//!
//! ```ignore
//! use accrete::{Entity, EntityId, Runtime, Value};
//!
//! // Wire the in-memory reference backends around your logic.
//! let runtime = Runtime::in_memory(MyLogic)?;
//!
//! // Submit a fact; get back the root increment's record id.
//! let fact = Entity::new(EntityId::parse("order/42")?, Value::Int(1));
//! let id = runtime.submit(fact).await?;
//! ```
//!
//! # Architecture
//!
//! - `accrete-core`: identifiers, stamps, increment records, contracts
//! - `accrete-logic`: the command algebra and cooperative interpreter
//! - `accrete-data`: the cache/repository/transaction-engine protocol
//! - `accrete-engine`: the increment scheduler
//! - `accrete-store`: reference backends and the standard serializer

use std::sync::Arc;

pub use accrete_core::{
    child_marker_entity, descriptor, record_entity, Behavior, BinaryStamp, Cache, CacheDecision,
    CancelToken, CommitOutcome, Conflict, Encoding, Entity, EntityId, Error, EventLogInput,
    EventRecord, Fact, Increment, IncrementId, IncrementInput, IncrementStatus, NoopBehavior,
    Repository, Result, RuntimeLimits, Serializer, SideEffect, Stamp, StampKey, StampSource,
    TransactionEngine, Value, CHILD_CATEGORY, INCREMENT_CATEGORY,
};
pub use accrete_data::DataEngine;
pub use accrete_engine::{descendants, load_record, Scheduler};
pub use accrete_logic::{Command, Interpreter, Logic, OutputCommand, RunOutcome};
pub use accrete_store::{
    FsRepository, MemoryCache, MemoryRepository, MemoryTransactionEngine, StandardSerializer,
};

/// A wired runtime: scheduler + data engine + backends.
///
/// The thin convenience over [`Scheduler`] for the common wiring cases;
/// anything more elaborate composes the parts directly.
pub struct Runtime<L: Logic> {
    scheduler: Scheduler<L>,
}

impl<L: Logic> Runtime<L> {
    /// A runtime over the in-memory reference backends with no side-effect
    /// behavior. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Rejects unusable limits.
    pub fn in_memory(logic: L) -> Result<Self> {
        Self::in_memory_with(logic, Arc::new(NoopBehavior), RuntimeLimits::default())
    }

    /// A runtime over the in-memory reference backends with an explicit
    /// behavior callback and limits. Must be called within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Rejects unusable limits.
    pub fn in_memory_with(logic: L, behavior: Arc<dyn Behavior>, limits: RuntimeLimits) -> Result<Self> {
        let data = Arc::new(DataEngine::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryTransactionEngine::new()),
            Arc::new(StandardSerializer::json()),
            limits.clone(),
        )?);
        Self::new(data, Arc::new(logic), behavior, limits)
    }

    /// A runtime over an already wired data engine.
    ///
    /// # Errors
    ///
    /// Rejects unusable limits.
    pub fn new(
        data: Arc<DataEngine>,
        logic: Arc<L>,
        behavior: Arc<dyn Behavior>,
        limits: RuntimeLimits,
    ) -> Result<Self> {
        Ok(Runtime { scheduler: Scheduler::new(data, logic, behavior, limits)? })
    }

    /// Run one fact and its derived subtrees to completion; returns the
    /// root increment's record id, or `None` when the root was dropped
    /// after exhausting its attempts.
    ///
    /// # Errors
    ///
    /// Cancellation and infrastructure faults.
    pub async fn submit(&self, fact: Fact) -> Result<Option<IncrementId>> {
        self.scheduler.submit(fact).await
    }

    /// [`submit`](Self::submit) under an externally owned cancellation
    /// token.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn submit_with(&self, fact: Fact, cancel: CancelToken) -> Result<Option<IncrementId>> {
        self.scheduler.submit_with(fact, cancel).await
    }

    /// The data engine behind this runtime
    pub fn data(&self) -> &Arc<DataEngine> {
        self.scheduler.data()
    }

    /// Load an increment record by its id.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such record exists.
    pub async fn record(&self, id: &IncrementId) -> Result<Increment> {
        load_record(self.data(), id).await
    }

    /// Record ids of every increment derived from `parent`, oldest first.
    ///
    /// # Errors
    ///
    /// Repository listing failures.
    pub async fn descendants(&self, parent: &IncrementId) -> Result<Vec<IncrementId>> {
        descendants(self.data(), parent).await
    }
}

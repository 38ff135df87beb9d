//! Collaborator contracts
//!
//! These traits are the seams between the consistency engine and its
//! external collaborators: the durable repository, the shared cache, the
//! transaction engine, the payload serializer, and the side-effect
//! behavior callback. Swapping backends must never change the protocol
//! above them.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple tasks (requires Send + Sync).

use crate::error::Result;
use crate::id::{EntityId, IncrementId};
use crate::increment::SideEffect;
use crate::stamp::{BinaryStamp, Encoding, Stamp};
use crate::value::Value;
use async_trait::async_trait;

/// Outcome of a monotonic cache compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The stamp was installed (nothing newer was present)
    Installed,
    /// Something newer was already cached; nothing was written
    Superseded {
        /// The increment id currently cached
        current: IncrementId,
    },
}

/// One entry of an entity's event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Entry id, totally ordered like any increment id
    pub id: IncrementId,
    /// Opaque entry payload
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Build an event record
    pub fn new(id: IncrementId, payload: Vec<u8>) -> Self {
        EventRecord { id, payload }
    }
}

/// Outcome of an optimistic multi-entity commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every premise held; every conclusion pointer was updated
    Committed,
    /// At least one premise diverged; nothing was written
    Conflicts(Vec<crate::error::Conflict>),
}

/// Durable, append-only stamp store.
///
/// Once a (entity, increment) stamp is saved it is never modified.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist one stamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn save(&self, stamp: &BinaryStamp) -> Result<()>;

    /// Load the stamp at exactly (entity, increment).
    ///
    /// # Errors
    ///
    /// `NotFound` when no such stamp exists; otherwise backend failures.
    async fn load(&self, entity: &EntityId, increment: &IncrementId) -> Result<BinaryStamp>;

    /// Ids of stamps chronologically older than `before`, newest first,
    /// at most `max` of them.
    ///
    /// The singularity as `before` means "older than the start of
    /// history": nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend listing fails.
    async fn history_before(
        &self,
        entity: &EntityId,
        before: &IncrementId,
        max: usize,
    ) -> Result<Vec<IncrementId>>;

    /// Ids of stamps chronologically newer than `after`, oldest first.
    ///
    /// The singularity as `after` means "newer than the start of
    /// history": everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend listing fails.
    async fn history_after(&self, entity: &EntityId, after: &IncrementId) -> Result<Vec<IncrementId>>;
}

/// Shared cache of current stamps, monotonic by increment id, plus the
/// event-log API consumed by log-structured features layered above.
#[async_trait]
pub trait Cache: Send + Sync {
    /// The cached stamp for an entity, if any.
    ///
    /// A cached absent stamp is a hit: confirmed non-existence.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    async fn get(&self, entity: &EntityId) -> Result<Option<BinaryStamp>>;

    /// Unconditionally install a stamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn set(&self, stamp: &BinaryStamp) -> Result<()>;

    /// Install a stamp only if nothing newer is already cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn update_if_newer(&self, stamp: &BinaryStamp) -> Result<CacheDecision>;

    /// Append one entry to an entity's event log.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn append_event(&self, entity: &EntityId, event: EventRecord) -> Result<()>;

    /// The entity's full event log, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    async fn event_log(&self, entity: &EntityId) -> Result<Vec<EventRecord>>;

    /// Drop entries with ids at or older than `up_to`; returns how many
    /// were dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn truncate_events(&self, entity: &EntityId, up_to: &IncrementId) -> Result<usize>;

    /// Install a whole event log only if the entity has none yet; returns
    /// whether the install happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn update_events_if_not_exists(
        &self,
        entity: &EntityId,
        events: Vec<EventRecord>,
    ) -> Result<bool>;
}

/// The source of truth for "latest increment id per entity".
///
/// `try_commit` must be atomic across the *entire* premise+conclusion set:
/// verify that every premised entity it has seen before still records the
/// expected id (a never-seen entity is trivially satisfied, enabling
/// bootstrap); if all hold, set every conclusion pointer to the new id;
/// otherwise report every mismatch and write nothing. Any number of
/// premises and conclusions is legal, including zero. This layer imposes
/// no monotonicity; only the cache does.
#[async_trait]
pub trait TransactionEngine: Send + Sync {
    /// Attempt an optimistic multi-entity compare-and-set.
    ///
    /// # Errors
    ///
    /// Returns an error only for backend/transport failures; a logical
    /// conflict is a normal [`CommitOutcome::Conflicts`] outcome.
    async fn try_commit(
        &self,
        premises: &[(EntityId, IncrementId)],
        conclusions: &[EntityId],
        new_id: &IncrementId,
    ) -> Result<CommitOutcome>;
}

/// Domain payload codec
pub trait Serializer: Send + Sync {
    /// Encode a decoded value into a tagged byte payload.
    ///
    /// # Errors
    ///
    /// `Serde` when the value cannot be encoded.
    fn encode(&self, entity: &EntityId, value: &Value) -> Result<(Encoding, Vec<u8>)>;

    /// Decode a tagged byte payload.
    ///
    /// # Errors
    ///
    /// `NotSupportedEncoding` for unknown tags, `Serde` for malformed
    /// payloads.
    fn decode(&self, entity: &EntityId, encoding: Encoding, bytes: &[u8]) -> Result<Value>;
}

/// The interpreter's read seam: current stamp per entity.
///
/// Implemented by the data engine; test doubles implement it directly.
#[async_trait]
pub trait StampSource: Send + Sync {
    /// The current stamp for an entity (an absent stamp for confirmed
    /// non-existence).
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails; the owning run is aborted and
    /// retried wholesale.
    async fn current(&self, entity: &EntityId) -> Result<Stamp>;
}

/// Post-commit side-effect callback.
///
/// Invoked only after a successful commit; failures are logged by the
/// scheduler, never retried here.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Perform one side effect on behalf of an increment.
    ///
    /// # Errors
    ///
    /// Returns an error when the effect fails; the scheduler logs it.
    async fn invoke(&self, increment: &IncrementId, effect: &SideEffect) -> Result<()>;
}

/// A behavior that accepts and drops every side effect
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBehavior;

#[async_trait]
impl Behavior for NoopBehavior {
    async fn invoke(&self, _increment: &IncrementId, _effect: &SideEffect) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    // ====================================================================
    // Compile-time contract tests (object safety, Send+Sync)
    // ====================================================================

    #[test]
    fn contracts_are_object_safe_and_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Repository>();
        assert_send_sync::<dyn Cache>();
        assert_send_sync::<dyn TransactionEngine>();
        assert_send_sync::<dyn Serializer>();
        assert_send_sync::<dyn StampSource>();
        assert_send_sync::<dyn Behavior>();
    }

    // ====================================================================
    // Behavioral test for the noop behavior
    // ====================================================================

    #[tokio::test]
    async fn noop_behavior_accepts_everything() {
        let behavior = NoopBehavior;
        let effect = SideEffect::new("send-email", Value::Null);
        behavior.invoke(&IncrementId::generate(), &effect).await.unwrap();
    }

    /// A stamp source that always fails, for error-propagation checks.
    struct FailingSource;

    #[async_trait]
    impl StampSource for FailingSource {
        async fn current(&self, _entity: &EntityId) -> Result<Stamp> {
            Err(Error::exception("source down"))
        }
    }

    #[tokio::test]
    async fn source_errors_propagate_through_trait_object() {
        let source: Box<dyn StampSource> = Box::new(FailingSource);
        let entity = EntityId::parse("user/a").unwrap();
        assert!(source.current(&entity).await.is_err());
    }
}

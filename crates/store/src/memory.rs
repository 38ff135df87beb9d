//! In-memory reference backends
//!
//! These are the contract-reference implementations: correct, simple, and
//! fully in-process. Production deployments substitute durable and
//! distributed backends behind the same traits; every protocol test in the
//! workspace runs against these.

use accrete_core::{
    BinaryStamp, Cache, CacheDecision, CommitOutcome, Conflict, EntityId, Error, EventRecord,
    IncrementId, Repository, Result, TransactionEngine,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

// ============================================================================
// Repository
// ============================================================================

/// Append-only in-memory repository.
///
/// Stamps are kept per entity in a map keyed by the raw increment id
/// string, so ascending iteration is newest-first by construction.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    stamps: RwLock<BTreeMap<EntityId, BTreeMap<String, BinaryStamp>>>,
}

impl MemoryRepository {
    /// An empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stamps stored for an entity (test inspection)
    pub fn stamp_count(&self, entity: &EntityId) -> usize {
        self.stamps.read().get(entity).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save(&self, stamp: &BinaryStamp) -> Result<()> {
        if stamp.is_empty() {
            return Err(Error::exception("cannot persist an absent stamp"));
        }
        self.stamps
            .write()
            .entry(stamp.entity.clone())
            .or_default()
            .insert(stamp.increment.as_str().to_string(), stamp.clone());
        Ok(())
    }

    async fn load(&self, entity: &EntityId, increment: &IncrementId) -> Result<BinaryStamp> {
        self.stamps
            .read()
            .get(entity)
            .and_then(|history| history.get(increment.as_str()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                entity: entity.clone(),
                increment: increment.clone(),
            })
    }

    async fn history_before(
        &self,
        entity: &EntityId,
        before: &IncrementId,
        max: usize,
    ) -> Result<Vec<IncrementId>> {
        if before.is_none() {
            // Nothing is older than the start of history.
            return Ok(Vec::new());
        }
        let stamps = self.stamps.read();
        let Some(history) = stamps.get(entity) else {
            return Ok(Vec::new());
        };
        // Raw strings greater than `before` are chronologically older;
        // ascending iteration over them is newest-first.
        Ok(history
            .range::<str, _>((Excluded(before.as_str()), Unbounded))
            .take(max)
            .map(|(raw, _)| IncrementId::from_raw(raw.clone()))
            .collect())
    }

    async fn history_after(&self, entity: &EntityId, after: &IncrementId) -> Result<Vec<IncrementId>> {
        let stamps = self.stamps.read();
        let Some(history) = stamps.get(entity) else {
            return Ok(Vec::new());
        };
        // Strings less than `after` are chronologically newer; reversing
        // the ascending range yields oldest-first. The singularity bound
        // means "everything".
        let ids: Vec<IncrementId> = if after.is_none() {
            history.keys().rev().map(|raw| IncrementId::from_raw(raw.clone())).collect()
        } else {
            history
                .range::<str, _>((Unbounded, Excluded(after.as_str())))
                .rev()
                .map(|(raw, _)| IncrementId::from_raw(raw.clone()))
                .collect()
        };
        Ok(ids)
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Default)]
struct EventLog {
    // Two parallel lists mutated under one entry guard, so read, append
    // and truncate are each one atomic step.
    ids: Vec<IncrementId>,
    payloads: Vec<Vec<u8>>,
}

/// In-memory shared cache, monotonic by increment id
#[derive(Debug, Default)]
pub struct MemoryCache {
    stamps: DashMap<EntityId, BinaryStamp>,
    events: DashMap<EntityId, EventLog>,
}

impl MemoryCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached stamp (test inspection of the miss path)
    pub fn clear_stamps(&self) {
        self.stamps.clear();
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, entity: &EntityId) -> Result<Option<BinaryStamp>> {
        Ok(self.stamps.get(entity).map(|slot| slot.value().clone()))
    }

    async fn set(&self, stamp: &BinaryStamp) -> Result<()> {
        self.stamps.insert(stamp.entity.clone(), stamp.clone());
        Ok(())
    }

    async fn update_if_newer(&self, stamp: &BinaryStamp) -> Result<CacheDecision> {
        match self.stamps.entry(stamp.entity.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().increment.is_newer_than(&stamp.increment) {
                    Ok(CacheDecision::Superseded { current: slot.get().increment.clone() })
                } else {
                    slot.insert(stamp.clone());
                    Ok(CacheDecision::Installed)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(stamp.clone());
                Ok(CacheDecision::Installed)
            }
        }
    }

    async fn append_event(&self, entity: &EntityId, event: EventRecord) -> Result<()> {
        let mut log = self.events.entry(entity.clone()).or_default();
        log.ids.push(event.id);
        log.payloads.push(event.payload);
        Ok(())
    }

    async fn event_log(&self, entity: &EntityId) -> Result<Vec<EventRecord>> {
        Ok(self
            .events
            .get(entity)
            .map(|log| {
                log.ids
                    .iter()
                    .cloned()
                    .zip(log.payloads.iter().cloned())
                    .map(|(id, payload)| EventRecord::new(id, payload))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn truncate_events(&self, entity: &EntityId, up_to: &IncrementId) -> Result<usize> {
        let Some(mut log) = self.events.get_mut(entity) else {
            return Ok(0);
        };
        let before = log.ids.len();
        let keep: Vec<bool> = log.ids.iter().map(|id| id.is_newer_than(up_to)).collect();
        let mut keep_ids = keep.iter();
        log.ids.retain(|_| *keep_ids.next().unwrap_or(&true));
        let mut keep_payloads = keep.iter();
        log.payloads.retain(|_| *keep_payloads.next().unwrap_or(&true));
        Ok(before - log.ids.len())
    }

    async fn update_events_if_not_exists(
        &self,
        entity: &EntityId,
        events: Vec<EventRecord>,
    ) -> Result<bool> {
        match self.events.entry(entity.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                let mut log = EventLog::default();
                for event in events {
                    log.ids.push(event.id);
                    log.payloads.push(event.payload);
                }
                slot.insert(log);
                Ok(true)
            }
        }
    }
}

// ============================================================================
// Transaction engine
// ============================================================================

/// Reference transaction engine: the latest-id map under one mutex.
///
/// A distributed implementation must preserve the same atomicity across
/// the entire premise+conclusion set of one commit; this one gets it by
/// holding the lock for the whole check-then-write.
#[derive(Debug, Default)]
pub struct MemoryTransactionEngine {
    latest: Mutex<HashMap<EntityId, IncrementId>>,
}

impl MemoryTransactionEngine {
    /// An empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded latest id for an entity (test inspection)
    pub fn recorded(&self, entity: &EntityId) -> Option<IncrementId> {
        self.latest.lock().get(entity).cloned()
    }
}

#[async_trait]
impl TransactionEngine for MemoryTransactionEngine {
    async fn try_commit(
        &self,
        premises: &[(EntityId, IncrementId)],
        conclusions: &[EntityId],
        new_id: &IncrementId,
    ) -> Result<CommitOutcome> {
        let mut latest = self.latest.lock();

        let conflicts: Vec<Conflict> = premises
            .iter()
            .filter_map(|(entity, expected)| {
                // An entity never seen before is trivially satisfied.
                let recorded = latest.get(entity)?;
                (recorded != expected).then(|| {
                    Conflict::new(entity.clone(), expected.clone(), recorded.clone())
                })
            })
            .collect();

        if !conflicts.is_empty() {
            return Ok(CommitOutcome::Conflicts(conflicts));
        }

        for entity in conclusions {
            latest.insert(entity.clone(), new_id.clone());
        }
        Ok(CommitOutcome::Committed)
    }
}

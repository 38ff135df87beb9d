//! The data engine
//!
//! The sole synchronization point across the cache, the durable
//! repository, and the transaction engine. Reads are cache-aside with a
//! monotonic seeding CAS; writes hit the cache synchronously and persist
//! asynchronously through the writer task; commits delegate to the
//! transaction engine and screen conflicts for benign races, reconciling
//! flagged entities in the background.

use crate::reconcile::{is_benign_race, reconcile};
use crate::writer::{spawn_writer, WriteJob};
use accrete_core::{
    BinaryStamp, Cache, CacheDecision, CommitOutcome, EntityId, Error, EventRecord, IncrementId,
    Repository, Result, RuntimeLimits, Serializer, Stamp, StampSource, TransactionEngine, Value,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// Load the latest effective stamp for an entity straight from the
/// repository: bounded reverse history scan, skipping ids that never took
/// effect. Returns an absent stamp when nothing is found.
pub(crate) async fn load_latest(
    repository: &dyn Repository,
    entity: &EntityId,
    scan_depth: usize,
) -> Result<BinaryStamp> {
    // A freshly minted id is newer than anything already persisted, so it
    // bounds the scan at "now".
    let bound = IncrementId::generate();
    let ids = repository.history_before(entity, &bound, scan_depth).await?;
    for id in ids {
        if !id.took_effect() {
            continue;
        }
        match repository.load(entity, &id).await {
            Ok(stamp) => return Ok(stamp),
            // Listed but gone: racing with a slow or failed writer; the
            // next older stamp is the effective one.
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(BinaryStamp::absent(entity.clone()))
}

/// The consistency protocol over cache + repository + transaction engine
pub struct DataEngine {
    repository: Arc<dyn Repository>,
    cache: Arc<dyn Cache>,
    transactions: Arc<dyn TransactionEngine>,
    serializer: Arc<dyn Serializer>,
    limits: RuntimeLimits,
    writer: mpsc::UnboundedSender<WriteJob>,
    write_errors: Arc<Mutex<Vec<Error>>>,
    reconciliations: Mutex<Vec<JoinHandle<()>>>,
}

impl DataEngine {
    /// Wire a data engine over its collaborators and start the writer
    /// task. Must be called within a tokio runtime.
    pub fn new(
        repository: Arc<dyn Repository>,
        cache: Arc<dyn Cache>,
        transactions: Arc<dyn TransactionEngine>,
        serializer: Arc<dyn Serializer>,
        limits: RuntimeLimits,
    ) -> Result<Self> {
        limits.validate()?;
        let write_errors = Arc::new(Mutex::new(Vec::new()));
        let writer = spawn_writer(
            Arc::clone(&repository),
            Arc::clone(&write_errors),
            limits.write_queue_batch,
        );
        Ok(DataEngine {
            repository,
            cache,
            transactions,
            serializer,
            limits,
            writer,
            write_errors,
            reconciliations: Mutex::new(Vec::new()),
        })
    }

    /// The durable repository behind this engine
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// The cache behind this engine
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// The transaction engine behind this engine
    pub fn transactions(&self) -> &Arc<dyn TransactionEngine> {
        &self.transactions
    }

    /// The payload serializer behind this engine
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// The current stamp for an entity, cache-aside.
    ///
    /// On a miss the repository's bounded reverse history is scanned
    /// (skipping ids that never took effect) and the result, a real stamp
    /// or confirmed absence, seeds the cache through the monotonic CAS.
    /// If the CAS reports something newer already cached, the loaded value
    /// is discarded and the cache is re-read, so a racing reader can never
    /// be served a stale value.
    ///
    /// # Errors
    ///
    /// Backend and decode failures.
    pub async fn retrieve(&self, entity: &EntityId) -> Result<Stamp> {
        if let Some(cached) = self.cache.get(entity).await? {
            return self.decode(cached);
        }

        let loaded = load_latest(self.repository.as_ref(), entity, self.limits.history_scan_depth).await?;
        match self.cache.update_if_newer(&loaded).await? {
            CacheDecision::Installed => self.decode(loaded),
            CacheDecision::Superseded { .. } => match self.cache.get(entity).await? {
                Some(winner) => self.decode(winner),
                // The newer occupant vanished (eviction); the loaded value
                // is the best answer we have.
                None => self.decode(loaded),
            },
        }
    }

    /// Upload a stamp: synchronous monotonic cache write (unless
    /// bypassing), asynchronous batched persistence.
    ///
    /// Write-once stamps that are only ever read back through the
    /// repository (fact triggers, audit records) bypass the cache.
    ///
    /// # Errors
    ///
    /// Encode failures, cache failures, or a closed writer queue.
    pub async fn upload(&self, stamp: &Stamp, bypass_cache: bool) -> Result<()> {
        let Some(value) = &stamp.value else {
            return Err(Error::exception("cannot upload an absent stamp"));
        };
        let (encoding, bytes) = self.serializer.encode(&stamp.entity, value)?;
        let binary = BinaryStamp::new(stamp.entity.clone(), stamp.increment.clone(), encoding, bytes);
        if !bypass_cache {
            self.cache.update_if_newer(&binary).await?;
        }
        self.writer
            .send(WriteJob::Save(binary))
            .map_err(|_| Error::exception("write queue closed"))
    }

    /// Append one entry to an entity's event log.
    ///
    /// # Errors
    ///
    /// Cache backend failures.
    pub async fn append_event(&self, entity: &EntityId, event: EventRecord) -> Result<()> {
        self.cache.append_event(entity, event).await
    }

    /// An entity's full event log, oldest entry first.
    ///
    /// # Errors
    ///
    /// Cache backend failures.
    pub async fn event_log(&self, entity: &EntityId) -> Result<Vec<EventRecord>> {
        self.cache.event_log(entity).await
    }

    /// Drop event-log entries at or older than `up_to`.
    ///
    /// # Errors
    ///
    /// Cache backend failures.
    pub async fn truncate_events(&self, entity: &EntityId, up_to: &IncrementId) -> Result<usize> {
        self.cache.truncate_events(entity, up_to).await
    }

    /// Install an event log only if the entity has none yet.
    ///
    /// # Errors
    ///
    /// Cache backend failures.
    pub async fn install_event_log_if_absent(
        &self,
        entity: &EntityId,
        events: Vec<EventRecord>,
    ) -> Result<bool> {
        self.cache.update_events_if_not_exists(entity, events).await
    }

    /// Attempt an atomic multi-entity commit.
    ///
    /// Keys are put into canonical order before delegation. On conflict,
    /// every conflicting entity is screened by the benign-race heuristic
    /// and flagged ones are reconciled in the background; the caller
    /// always gets the full structured conflict list and is expected to
    /// rerun its logic from scratch.
    ///
    /// # Errors
    ///
    /// [`Error::Commit`] on conflicts; transport failures otherwise.
    pub async fn try_commit(
        &self,
        mut premises: Vec<(EntityId, IncrementId)>,
        mut conclusions: Vec<EntityId>,
        new_id: &IncrementId,
    ) -> Result<()> {
        premises.sort_by(|a, b| a.0.cmp(&b.0));
        conclusions.sort();

        match self.transactions.try_commit(&premises, &conclusions, new_id).await? {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::Conflicts(conflicts) => {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(self.limits.stale_after)
                        .unwrap_or_else(|_| chrono::Duration::milliseconds(0));
                for conflict in &conflicts {
                    if is_benign_race(conflict, cutoff) {
                        self.spawn_reconcile(conflict.clone());
                    }
                }
                Err(Error::Commit(conflicts))
            }
        }
    }

    /// Drain and await the write queue and any in-flight reconciliations;
    /// surface accumulated persistence errors.
    ///
    /// Called at the end of every increment run, and from tests for
    /// determinism.
    ///
    /// # Errors
    ///
    /// The accumulated writer errors, aggregated when there are several.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.writer
            .send(WriteJob::Flush(ack))
            .map_err(|_| Error::exception("write queue closed"))?;
        done.await
            .map_err(|_| Error::exception("write queue dropped its flush ack"))?;

        let pending: Vec<JoinHandle<()>> = self.reconciliations.lock().drain(..).collect();
        for handle in pending {
            if let Err(fault) = handle.await {
                warn!(error = %fault, "reconciliation task failed");
            }
        }

        let mut errors = self.write_errors.lock();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors.drain(..).collect())),
        }
    }

    fn spawn_reconcile(&self, conflict: accrete_core::Conflict) {
        let cache = Arc::clone(&self.cache);
        let repository = Arc::clone(&self.repository);
        let transactions = Arc::clone(&self.transactions);
        let scan_depth = self.limits.history_scan_depth;
        let handle = tokio::spawn(reconcile(cache, repository, transactions, scan_depth, conflict));
        self.reconciliations.lock().push(handle);
    }

    fn decode(&self, binary: BinaryStamp) -> Result<Stamp> {
        if binary.is_empty() {
            return Ok(Stamp::absent(binary.entity));
        }
        let value: Value = self.serializer.decode(&binary.entity, binary.encoding, &binary.bytes)?;
        Ok(Stamp::new(binary.entity, binary.increment, value))
    }
}

#[async_trait]
impl StampSource for DataEngine {
    async fn current(&self, entity: &EntityId) -> Result<Stamp> {
        self.retrieve(entity).await
    }
}

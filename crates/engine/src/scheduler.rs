//! The increment scheduler
//!
//! Orchestrates fact trees: durably writes each fact as a cache-bypassing
//! trigger stamp, drives interpreter runs through the arena, publishes
//! successful outcomes through the optimistic commit protocol, dispatches
//! side effects, recurses into derived facts as new subtrees, and retries
//! failed runs from scratch up to the attempt limit. Every outcome,
//! success or failure or loss, persists as an immutable increment record.
//!
//! Consistency is enforced only at commit time: runs that share no
//! premised entity proceed in any order, and when two runs premise the
//! same entity, whichever commits first wins while the loser re-derives
//! fresh premises in a full rerun.

use crate::record::persist_record;
use crate::run::{RunArena, RunNode};
use accrete_core::{
    CancelToken, EntityId, Error, Fact, Increment, IncrementId, IncrementStatus, Result,
    RuntimeLimits, Stamp, StampKey, StampSource, Value, Behavior, DETAIL_ATTEMPT,
    DETAIL_COMMIT_MILLIS, DETAIL_ERROR, DETAIL_LOGIC_MILLIS,
};
use accrete_data::DataEngine;
use accrete_logic::{Interpreter, Logic, RunOutcome};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One finished interpreter run, keyed back into the arena
struct RunFinished {
    node: u64,
    result: Result<RunOutcome>,
    logic_millis: u128,
}

/// A successfully published increment
struct Published {
    /// The record id (suffix-tagged when the increment degraded to Lost)
    id: IncrementId,
    /// Derived facts with their durably written trigger stamps
    children: Vec<(Fact, StampKey)>,
}

/// Orchestrator of increment trees over one logic implementation
pub struct Scheduler<L: Logic> {
    data: Arc<DataEngine>,
    logic: Arc<L>,
    behavior: Arc<dyn Behavior>,
    limits: RuntimeLimits,
}

impl<L: Logic> Scheduler<L> {
    /// Wire a scheduler.
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
        limits.validate()?;
        Ok(Scheduler { data, logic, behavior, limits })
    }

    /// The data engine this scheduler publishes through
    pub fn data(&self) -> &Arc<DataEngine> {
        &self.data
    }

    /// Run one fact and its derived subtrees to completion.
    ///
    /// Returns the root increment's record id, or `None` when the root
    /// was dropped after exhausting its attempts.
    ///
    /// # Errors
    ///
    /// Cancellation and infrastructure faults; logic failures and commit
    /// conflicts are retried internally and never surface here.
    pub async fn submit(&self, fact: Fact) -> Result<Option<IncrementId>> {
        self.submit_with(fact, CancelToken::new()).await
    }

    /// [`submit`](Self::submit) under an externally owned cancellation
    /// token.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn submit_with(&self, fact: Fact, cancel: CancelToken) -> Result<Option<IncrementId>> {
        let trigger = self.persist_fact(&fact, &cancel).await?;

        let mut arena = RunArena::new();
        let mut runs: JoinSet<RunFinished> = JoinSet::new();
        let root_key = arena.insert(RunNode {
            fact,
            trigger,
            parent: IncrementId::none(),
            attempt: 1,
        });
        self.spawn_run(root_key, &arena, &mut runs, &cancel)?;

        let mut root_record: Option<IncrementId> = None;
        let mut root_keys = vec![root_key];

        while let Some(joined) = runs.join_next().await {
            let finished =
                joined.map_err(|fault| Error::exception(format!("interpreter task failed: {fault}")))?;
            let node = arena
                .remove(finished.node)
                .ok_or_else(|| Error::exception("finished run is missing from the arena"))?;
            let was_root = root_keys.contains(&finished.node);

            match finished.result {
                Ok(outcome) => {
                    match self.publish(&node, outcome, finished.logic_millis, &cancel).await {
                        Ok(published) => {
                            if was_root {
                                root_record = Some(published.id.clone());
                            }
                            for (child_fact, child_trigger) in published.children {
                                let key = arena.insert(RunNode {
                                    fact: child_fact,
                                    trigger: child_trigger,
                                    parent: published.id.clone(),
                                    attempt: 1,
                                });
                                self.spawn_run(key, &arena, &mut runs, &cancel)?;
                            }
                        }
                        Err(err) if err.is_cancelled() => return Err(Error::Cancelled),
                        // Commit conflicts and publish faults alike: the
                        // premises are stale or unverified, so rerun the
                        // logic from scratch. The Fail record was already
                        // persisted by publish.
                        Err(err) => {
                            self.requeue(node, was_root, err, &mut arena, &mut runs, &mut root_keys, &cancel)?;
                        }
                    }
                }
                Err(err) if err.is_cancelled() => return Err(Error::Cancelled),
                Err(err) => {
                    self.record_run_failure(&node, &err, finished.logic_millis).await;
                    self.requeue(node, was_root, err, &mut arena, &mut runs, &mut root_keys, &cancel)?;
                }
            }
        }

        self.data.flush().await?;
        Ok(root_record)
    }

    /// Durably write the fact as a cache-bypassing trigger stamp
    async fn persist_fact(&self, fact: &Fact, cancel: &CancelToken) -> Result<StampKey> {
        cancel.ensure_active()?;
        let id = IncrementId::generate().tagged_fact();
        let stamp = Stamp::new(fact.id.clone(), id.clone(), fact.value.clone());
        self.data.upload(&stamp, true).await?;
        Ok(StampKey::new(fact.id.clone(), id))
    }

    fn spawn_run(
        &self,
        key: u64,
        arena: &RunArena,
        runs: &mut JoinSet<RunFinished>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let node = arena
            .get(key)
            .ok_or_else(|| Error::exception("spawned run is missing from the arena"))?;
        debug!(fact = %node.fact.id, attempt = node.attempt, "interpreter run starting");

        let fact = node.fact.clone();
        let logic = Arc::clone(&self.logic);
        let source: Arc<dyn StampSource> = Arc::clone(&self.data) as Arc<dyn StampSource>;
        let limits = self.limits.clone();
        let cancel = cancel.clone();
        runs.spawn(async move {
            let started = Instant::now();
            let result = Interpreter::new(limits).run(logic.as_ref(), &fact, source, &cancel).await;
            RunFinished {
                node: key,
                result,
                logic_millis: started.elapsed().as_millis(),
            }
        });
        Ok(())
    }

    /// Re-queue a failed node with a bumped attempt count, or drop it once
    /// the attempt limit is exhausted
    #[allow(clippy::too_many_arguments)]
    fn requeue(
        &self,
        node: RunNode,
        was_root: bool,
        err: Error,
        arena: &mut RunArena,
        runs: &mut JoinSet<RunFinished>,
        root_keys: &mut Vec<u64>,
        cancel: &CancelToken,
    ) -> Result<()> {
        if node.attempt >= self.limits.max_attempts {
            warn!(fact = %node.fact.id, attempts = node.attempt, error = %err,
                "dropping fact after exhausting attempts");
            return Ok(());
        }
        let key = arena.insert(RunNode { attempt: node.attempt + 1, ..node });
        if was_root {
            root_keys.push(key);
        }
        self.spawn_run(key, arena, runs, cancel)
    }

    /// Publish one successful interpreter run: commit, upload, dispatch,
    /// record
    async fn publish(
        &self,
        node: &RunNode,
        outcome: RunOutcome,
        logic_millis: u128,
        cancel: &CancelToken,
    ) -> Result<Published> {
        cancel.ensure_active()?;

        let id = IncrementId::generate();

        // Premises: declared-as-premise inputs only.
        let premises: Vec<(EntityId, IncrementId)> = outcome
            .inputs
            .iter()
            .filter(|input| input.premise)
            .map(|input| (input.key.entity.clone(), input.key.increment.clone()))
            .collect();

        // Conclusions: published entities minus structurally unchanged
        // ones.
        let conclusions: Vec<(EntityId, Value)> = outcome
            .published
            .iter()
            .filter(|(entity, value)| {
                outcome
                    .observed
                    .get(*entity)
                    .and_then(|stamp| stamp.value.as_ref())
                    .map_or(true, |seen| seen != *value)
            })
            .map(|(entity, value)| (entity.clone(), value.clone()))
            .collect();
        let conclusion_ids: Vec<EntityId> = conclusions.iter().map(|(entity, _)| entity.clone()).collect();

        let commit_started = Instant::now();
        let committed = self
            .data
            .try_commit(premises, conclusion_ids.clone(), &id)
            .await;
        let commit_millis = commit_started.elapsed().as_millis();

        match committed {
            Ok(()) => {
                self.finish_committed(
                    node,
                    outcome,
                    id,
                    conclusions,
                    conclusion_ids,
                    logic_millis,
                    commit_millis,
                )
                .await
            }
            Err(err) => {
                // Status Fail: nothing took effect. Persist the record so
                // the retry history is auditable, then hand the error back
                // for a full rerun.
                let mut record = Increment::new(
                    id.tagged_fail(),
                    node.parent.clone(),
                    IncrementStatus::Fail,
                    node.trigger.clone(),
                );
                record.inputs = outcome.inputs;
                record.side_effects = outcome.side_effects;
                record.constants = outcome.constants;
                self.stamp_details(&mut record, node.attempt, logic_millis, Some(commit_millis));
                record.details.insert(DETAIL_ERROR.to_string(), err.to_string());
                if let Err(persist_err) = persist_record(&self.data, &record).await {
                    warn!(error = %persist_err, "failed to persist a failure record");
                }
                Err(Error::with_record(record, err))
            }
        }
    }

    /// Post-commit work: output upload, derived facts, side effects, the
    /// record itself
    #[allow(clippy::too_many_arguments)]
    async fn finish_committed(
        &self,
        node: &RunNode,
        outcome: RunOutcome,
        id: IncrementId,
        conclusions: Vec<(EntityId, Value)>,
        conclusion_ids: Vec<EntityId>,
        logic_millis: u128,
        commit_millis: u128,
    ) -> Result<Published> {
        let mut status = IncrementStatus::Success;

        // Upload outputs, best-effort: the commit is already externally
        // observable, so a failed upload degrades the increment to Lost
        // instead of undoing anything. Output uploads never bypass the
        // cache.
        for (entity, value) in &conclusions {
            let stamp = Stamp::new(entity.clone(), id.clone(), value.clone());
            if let Err(err) = self.data.upload(&stamp, false).await {
                warn!(entity = %entity, error = %err, "output upload failed; increment degrades to Lost");
                status = IncrementStatus::Lost;
            }
        }

        // Derived facts become fresh trigger stamps; each schedules a new
        // subtree under this increment.
        let mut derived_ids = Vec::new();
        let mut children = Vec::new();
        for child in outcome.derived {
            let fact_id = IncrementId::generate().tagged_fact();
            let stamp = Stamp::new(child.id.clone(), fact_id.clone(), child.value.clone());
            match self.data.upload(&stamp, true).await {
                Ok(()) => {
                    derived_ids.push(fact_id.clone());
                    let trigger = StampKey::new(child.id.clone(), fact_id);
                    children.push((child, trigger));
                }
                Err(err) => {
                    warn!(entity = %child.id, error = %err,
                        "derived fact upload failed; subtree skipped, increment degrades to Lost");
                    status = IncrementStatus::Lost;
                }
            }
        }

        let record_id = match status {
            IncrementStatus::Lost => id.tagged_lost(),
            _ => id.clone(),
        };

        // Side effects run only after the successful commit: concurrent,
        // best-effort, individually logged, never retried here.
        if !outcome.side_effects.is_empty() {
            let mut effects: JoinSet<()> = JoinSet::new();
            for effect in outcome.side_effects.clone() {
                let behavior = Arc::clone(&self.behavior);
                let effect_id = record_id.clone();
                effects.spawn(async move {
                    if let Err(err) = behavior.invoke(&effect_id, &effect).await {
                        warn!(effect = %effect, error = %err, "side effect failed");
                    }
                });
            }
            while effects.join_next().await.is_some() {}
        }

        let mut record = Increment::new(
            record_id.clone(),
            node.parent.clone(),
            status,
            node.trigger.clone(),
        );
        record.inputs = outcome.inputs;
        record.outputs = conclusion_ids;
        record.derived = derived_ids;
        record.side_effects = outcome.side_effects;
        record.constants = outcome.constants;
        self.stamp_details(&mut record, node.attempt, logic_millis, Some(commit_millis));
        if let Err(err) = persist_record(&self.data, &record).await {
            // The commit stands and children proceed; the missing record
            // is an audit gap worth shouting about, not a rollback.
            warn!(increment = %record.id, error = %err, "failed to persist an increment record");
        }

        // End of one increment run: drain the persistence queue.
        if let Err(err) = self.data.flush().await {
            warn!(increment = %record.id, error = %err, "flush after publish reported failures");
        }

        Ok(Published { id: record_id, children })
    }

    /// Persist a Fail record for a run that never reached publishing
    async fn record_run_failure(&self, node: &RunNode, err: &Error, logic_millis: u128) {
        let mut record = Increment::new(
            IncrementId::generate().tagged_fail(),
            node.parent.clone(),
            IncrementStatus::Fail,
            node.trigger.clone(),
        );
        self.stamp_details(&mut record, node.attempt, logic_millis, None);
        record.details.insert(DETAIL_ERROR.to_string(), err.to_string());
        if let Err(persist_err) = persist_record(&self.data, &record).await {
            warn!(error = %persist_err, "failed to persist a failure record");
        }
    }

    fn stamp_details(
        &self,
        record: &mut Increment,
        attempt: u32,
        logic_millis: u128,
        commit_millis: Option<u128>,
    ) {
        record
            .details
            .insert(DETAIL_ATTEMPT.to_string(), attempt.to_string());
        record
            .details
            .insert(DETAIL_LOGIC_MILLIS.to_string(), logic_millis.to_string());
        if let Some(millis) = commit_millis {
            record
                .details
                .insert(DETAIL_COMMIT_MILLIS.to_string(), millis.to_string());
        }
    }
}

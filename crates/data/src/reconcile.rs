//! Background reconciliation of suspected benign races
//!
//! Cache and transaction-engine updates are independent, non-atomic steps:
//! after a crash or a slow writer they can disagree. When a commit
//! conflict looks like such a race rather than a real logical conflict
//! (the recorded id is *older* than the premise, which only happens when
//! writers interleaved unexpectedly, or the recorded id is older than a
//! short staleness window), the conflicting entity is reconciled here,
//! off the caller's path: re-read the cache, and if it disagrees with the
//! recorded id, reload the true latest stamp from the repository, push a
//! corrective commit (recorded id → true id) and a cache update. Success
//! or failure is logged; the committing caller is never blocked.

use crate::engine::load_latest;
use accrete_core::{Cache, CommitOutcome, Conflict, IncrementId, Repository, TransactionEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Screen one conflict for "benign race, not a real logical conflict".
///
/// `cutoff` is now minus the staleness window.
pub(crate) fn is_benign_race(conflict: &Conflict, cutoff: DateTime<Utc>) -> bool {
    // Recorded id older than the premise: the premise was read *after*
    // the recorded commit, so the engine is behind, not ahead.
    conflict.expected.is_newer_than(&conflict.actual) || conflict.actual.minted_before(cutoff)
}

/// Reconcile one flagged entity. Runs as a detached background task.
pub(crate) async fn reconcile(
    cache: Arc<dyn Cache>,
    repository: Arc<dyn Repository>,
    transactions: Arc<dyn TransactionEngine>,
    scan_depth: usize,
    conflict: Conflict,
) {
    let entity = conflict.entity.clone();

    let cached_id = match cache.get(&entity).await {
        Ok(Some(stamp)) => stamp.increment,
        Ok(None) => IncrementId::none(),
        Err(err) => {
            warn!(entity = %entity, error = %err, "reconciliation could not read the cache");
            return;
        }
    };

    if cached_id == conflict.actual {
        debug!(entity = %entity, "cache agrees with the transaction engine; race already settled");
        return;
    }

    let latest = match load_latest(repository.as_ref(), &entity, scan_depth).await {
        Ok(stamp) => stamp,
        Err(err) => {
            warn!(entity = %entity, error = %err, "reconciliation could not load the repository");
            return;
        }
    };
    if latest.is_empty() {
        warn!(entity = %entity, "suspected race but the repository holds no stamp; leaving as is");
        return;
    }

    let true_id = latest.increment.clone();
    if true_id != conflict.actual {
        match transactions
            .try_commit(
                &[(entity.clone(), conflict.actual.clone())],
                &[entity.clone()],
                &true_id,
            )
            .await
        {
            Ok(CommitOutcome::Committed) => {
                info!(entity = %entity, from = %conflict.actual, to = %true_id,
                    "corrective commit applied");
            }
            Ok(CommitOutcome::Conflicts(_)) => {
                // Someone moved the pointer while we reconciled; theirs is
                // at least as fresh as our correction.
                debug!(entity = %entity, "corrective commit lost its own race");
            }
            Err(err) => {
                warn!(entity = %entity, error = %err, "corrective commit failed");
            }
        }
    }

    match cache.update_if_newer(&latest).await {
        Ok(_) => debug!(entity = %entity, increment = %latest.increment, "cache reconciled"),
        Err(err) => warn!(entity = %entity, error = %err, "cache reconciliation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_core::EntityId;
    use chrono::{Duration, TimeZone};

    fn entity() -> EntityId {
        EntityId::parse("user/a").unwrap()
    }

    fn instant(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
            + Duration::seconds(offset_secs)
    }

    fn id(offset_secs: i64) -> IncrementId {
        IncrementId::at(instant(offset_secs), "tail")
    }

    #[test]
    fn test_recorded_older_than_premise_is_benign() {
        // Premise read at t=100, engine still records t=50: interleaved
        // writers, not a logical conflict.
        let conflict = Conflict::new(entity(), id(100), id(50));
        assert!(is_benign_race(&conflict, instant(0)));
    }

    #[test]
    fn test_stale_recorded_id_is_benign() {
        // Engine records something newer than the premise, but minted
        // long before the cutoff.
        let conflict = Conflict::new(entity(), id(10), id(20));
        assert!(is_benign_race(&conflict, instant(30)));
    }

    #[test]
    fn test_fresh_newer_recorded_id_is_a_real_conflict() {
        // Recorded id newer than the premise and inside the window:
        // a genuine concurrent writer won.
        let conflict = Conflict::new(entity(), id(10), id(20));
        assert!(!is_benign_race(&conflict, instant(15)));
    }
}

//! Increment records
//!
//! An increment is one logic execution's immutable outcome: what triggered
//! it, what it observed, what it concluded, and how it ended. Records are
//! append-only and stored as entities under a reserved category, so the
//! full history of a system is auditable with nothing but the repository.
//!
//! A parallel child category records, per parent id, each derived
//! increment's existence; descendants are then enumerable with plain
//! history operations, without loading any record.

use crate::id::{EntityId, IncrementId};
use crate::stamp::StampKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved category for increment records
pub const INCREMENT_CATEGORY: &str = "increment";

/// Reserved category for parent-to-child markers
pub const CHILD_CATEGORY: &str = "increment-child";

/// Details key: attempt number, 1-based
pub const DETAIL_ATTEMPT: &str = "Attempt";

/// Details key: logic phase duration in milliseconds
pub const DETAIL_LOGIC_MILLIS: &str = "LogicMillis";

/// Details key: commit phase duration in milliseconds
pub const DETAIL_COMMIT_MILLIS: &str = "CommitMillis";

/// Details key: terminal error text
pub const DETAIL_ERROR: &str = "Error";

/// How one increment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncrementStatus {
    /// Committed and fully uploaded
    Success,
    /// Did not take effect (logic fault or commit conflict)
    Fail,
    /// Committed, but output upload failed; other readers may already
    /// observe the commit, so it is never rolled back
    Lost,
}

impl IncrementStatus {
    /// The id suffix that self-describes this status
    pub fn suffix(&self) -> &'static str {
        match self {
            IncrementStatus::Success => "",
            IncrementStatus::Fail => crate::id::FAIL_SUFFIX,
            IncrementStatus::Lost => crate::id::LOST_SUFFIX,
        }
    }
}

impl fmt::Display for IncrementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IncrementStatus::Success => "Success",
            IncrementStatus::Fail => "Fail",
            IncrementStatus::Lost => "Lost",
        };
        f.write_str(name)
    }
}

/// One observed input of an increment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementInput {
    /// The stamp that was observed
    pub key: StampKey,
    /// True when the commit required this exact version to still be
    /// current; confirmed absences are never premises
    pub premise: bool,
}

/// Event-log entries consumed from one entity's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogInput {
    /// Entity whose event log was read
    pub entity: EntityId,
    /// Ids of the consumed entries
    pub event_ids: Vec<IncrementId>,
}

/// Description of one requested side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideEffect {
    /// Effect name, dispatched on by the behavior callback
    pub name: String,
    /// Effect parameters
    pub payload: Value,
}

impl SideEffect {
    /// Build a side-effect description
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        SideEffect { name: name.into(), payload }
    }
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable record of one logic execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    /// Record id, suffix-tagged by status
    pub id: IncrementId,
    /// Parent record id; singularity for roots
    pub parent: IncrementId,
    /// How the increment ended
    pub status: IncrementStatus,
    /// The trigger stamp
    pub trigger: StampKey,
    /// Every stamp actually observed, with its premise flag
    pub inputs: Vec<IncrementInput>,
    /// Event-log entries consumed
    pub events: Vec<EventLogInput>,
    /// Entities this increment installed new versions for; excludes
    /// entities republished with a structurally equal value
    pub outputs: Vec<EntityId>,
    /// Trigger stamp ids of the facts this increment derived
    pub derived: Vec<IncrementId>,
    /// Requested side effects, in order
    pub side_effects: Vec<SideEffect>,
    /// Named constants declared by the logic
    pub constants: BTreeMap<String, Value>,
    /// Free-form details: attempt number, phase durations, error text
    pub details: BTreeMap<String, String>,
}

impl Increment {
    /// Start a record for one execution of a trigger
    pub fn new(id: IncrementId, parent: IncrementId, status: IncrementStatus, trigger: StampKey) -> Self {
        Increment {
            id,
            parent,
            status,
            trigger,
            inputs: Vec::new(),
            events: Vec::new(),
            outputs: Vec::new(),
            derived: Vec::new(),
            side_effects: Vec::new(),
            constants: BTreeMap::new(),
            details: BTreeMap::new(),
        }
    }

    /// True for roots (no parent increment)
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The entity this record is stored under: `increment/<id>`
    pub fn record_entity(&self) -> EntityId {
        record_entity(&self.id)
    }
}

/// The entity a record with the given id is stored under
pub fn record_entity(id: &IncrementId) -> EntityId {
    EntityId::new(INCREMENT_CATEGORY, id.as_str())
        .unwrap_or_else(|_| unreachable!("record ids are non-empty"))
}

/// The entity that carries child markers for the given parent id
pub fn child_marker_entity(parent: &IncrementId) -> EntityId {
    EntityId::new(CHILD_CATEGORY, parent.as_str())
        .unwrap_or_else(|_| unreachable!("parent ids are non-empty"))
}

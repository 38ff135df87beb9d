//! Core types and contracts for the accrete runtime
//!
//! This crate defines the foundational types used throughout the system:
//! - EntityId / IncrementId: identifiers and logical time
//! - Value: unified decoded value enum
//! - Stamp / BinaryStamp / StampKey: versioned (entity, id, payload) units
//! - Increment: the immutable outcome record of one logic execution
//! - Error / Conflict: the error taxonomy, with structured commit conflicts
//! - Traits: collaborator contracts (Repository, Cache, TransactionEngine,
//!   Serializer, StampSource, Behavior)
//! - CancelToken: cooperative cancellation
//! - RuntimeLimits: tuning knobs
//! - Descriptor caches: process-wide name-to-entity maps

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod descriptor;
pub mod error;
pub mod id;
pub mod increment;
pub mod limits;
pub mod stamp;
pub mod traits;
pub mod value;

// Re-export commonly used types at the crate root
pub use cancel::CancelToken;
pub use error::{Conflict, Error, Result};
pub use id::{EntityId, IncrementId, FACT_SUFFIX, FAIL_SUFFIX, LOST_SUFFIX};
pub use increment::{
    child_marker_entity, record_entity, EventLogInput, Increment, IncrementInput, IncrementStatus,
    SideEffect, CHILD_CATEGORY, DETAIL_ATTEMPT, DETAIL_COMMIT_MILLIS, DETAIL_ERROR,
    DETAIL_LOGIC_MILLIS, INCREMENT_CATEGORY,
};
pub use limits::RuntimeLimits;
pub use stamp::{BinaryStamp, Encoding, Entity, Fact, Stamp, StampKey};
pub use traits::{
    Behavior, Cache, CacheDecision, CommitOutcome, EventRecord, NoopBehavior, Repository,
    Serializer, StampSource, TransactionEngine,
};
pub use value::Value;

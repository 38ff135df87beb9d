//! Error taxonomy
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.
//! Commit conflicts are data, not faults: the scheduler always retries
//! them, so they carry the full structured conflict list. A terminal
//! failure never discards its context: the increment-specific variant
//! carries the partially built record alongside the cause.

use crate::id::{EntityId, IncrementId};
use crate::increment::Increment;
use std::io;
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// One entity whose recorded version diverged from a commit's premise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Entity the commit premised on
    pub entity: EntityId,
    /// The version the commit expected to still be current
    pub expected: IncrementId,
    /// The version the transaction engine actually recorded
    pub actual: IncrementId,
}

impl Conflict {
    /// Build a conflict
    pub fn new(entity: EntityId, expected: IncrementId, actual: IncrementId) -> Self {
        Conflict { entity, expected, actual }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: expected {}, actual {}", self.entity, self.expected, self.actual)
    }
}

/// Error taxonomy for the runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Expected absence: no stamp at the requested (entity, increment)
    #[error("not found: {entity}@{increment}")]
    NotFound {
        /// Entity that was looked up
        entity: EntityId,
        /// Increment that was looked up
        increment: IncrementId,
    },

    /// Payload undecodable: corruption or version skew
    #[error("serde error: {0}")]
    Serde(String),

    /// Unknown payload encoding tag
    #[error("not supported encoding: {0}")]
    NotSupportedEncoding(String),

    /// Backend transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Optimistic commit rejected; expected, always retried, never fatal
    #[error("commit conflict on {} entit{}", .0.len(), if .0.len() == 1 { "y" } else { "ies" })]
    Commit(Vec<Conflict>),

    /// Multiple concurrent causes
    #[error("{} concurrent failures", .0.len())]
    Aggregate(Vec<Error>),

    /// Uncaught fault, wrapped
    #[error("exception: {0}")]
    Exception(String),

    /// The cancellation token fired; fatal, never retried
    #[error("cancelled")]
    Cancelled,

    /// A failure with its partially built increment record attached, so
    /// failure context is never discarded
    #[error("increment {} failed: {source}", .record.id)]
    Increment {
        /// The record as built when the failure happened
        record: Box<Increment>,
        /// The underlying cause
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a message as an uncaught-fault error
    pub fn exception(message: impl Into<String>) -> Self {
        Error::Exception(message.into())
    }

    /// Wrap a serialization failure
    pub fn serde(message: impl std::fmt::Display) -> Self {
        Error::Serde(message.to_string())
    }

    /// Attach a partially built record to a cause
    pub fn with_record(record: Increment, source: Error) -> Self {
        Error::Increment { record: Box::new(record), source: Box::new(source) }
    }

    /// True for commit conflicts, at any wrapping depth of one record
    pub fn is_commit_conflict(&self) -> bool {
        match self {
            Error::Commit(_) => true,
            Error::Increment { source, .. } => source.is_commit_conflict(),
            _ => false,
        }
    }

    /// True for expected absence
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True when the cancellation token fired
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Increment { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The structured conflict list, if this is a commit conflict
    pub fn conflicts(&self) -> Option<&[Conflict]> {
        match self {
            Error::Commit(conflicts) => Some(conflicts),
            Error::Increment { source, .. } => source.conflicts(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::increment::IncrementStatus;
    use crate::stamp::StampKey;

    fn conflict() -> Conflict {
        Conflict::new(
            EntityId::parse("user/a").unwrap(),
            IncrementId::from_raw("000002-aa"),
            IncrementId::from_raw("000001-bb"),
        )
    }

    #[test]
    fn test_display_not_found() {
        let err = Error::NotFound {
            entity: EntityId::parse("user/a").unwrap(),
            increment: IncrementId::from_raw("000001-aa"),
        };
        assert!(err.to_string().contains("user/a"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display_commit_counts_conflicts() {
        let err = Error::Commit(vec![conflict()]);
        assert!(err.to_string().contains("1 entity"));
        let err = Error::Commit(vec![conflict(), conflict()]);
        assert!(err.to_string().contains("2 entities"));
    }

    #[test]
    fn test_commit_conflict_predicate_sees_through_record() {
        let record = Increment::new(
            IncrementId::generate().tagged_fail(),
            IncrementId::none(),
            IncrementStatus::Fail,
            StampKey::new(EntityId::parse("order/1").unwrap(), IncrementId::generate()),
        );
        let err = Error::with_record(record, Error::Commit(vec![conflict()]));
        assert!(err.is_commit_conflict());
        assert_eq!(err.conflicts().unwrap().len(), 1);
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_predicate() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::exception("boom").is_cancelled());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "transport down").into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_aggregate_display() {
        let err = Error::Aggregate(vec![Error::exception("a"), Error::exception("b")]);
        assert!(err.to_string().contains("2 concurrent failures"));
    }
}

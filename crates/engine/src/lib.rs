//! The increment scheduler
//!
//! Drives fact trees over the logic interpreter and the data engine:
//! attempt/retry orchestration, optimistic publishing, side-effect
//! dispatch, derived-fact subtrees, and immutable increment records for
//! every outcome.

pub mod record;
pub mod run;
pub mod scheduler;

pub use record::{descendants, load_record, persist_record, record_from_value, record_value};
pub use run::{RunArena, RunNode};
pub use scheduler::Scheduler;

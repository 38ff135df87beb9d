//! The data-engine consistency protocol
//!
//! [`DataEngine`] is the sole synchronization point across a shared cache,
//! a durable append-only repository, and the transaction engine that is
//! the source of truth for "latest increment id per entity". Reads are
//! cache-aside with monotonic seeding; writes are cached synchronously and
//! persisted asynchronously; commit conflicts are screened for benign
//! cache/engine races and reconciled in the background.

pub mod engine;
mod reconcile;
mod writer;

pub use engine::DataEngine;

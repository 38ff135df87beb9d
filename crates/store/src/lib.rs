//! Reference backends for the accrete runtime
//!
//! In-memory implementations of every collaborator contract (repository,
//! cache, transaction engine), a filesystem repository, and the standard
//! value serializer. The in-memory backends are the contract reference:
//! protocol tests throughout the workspace run against them.

pub mod fs;
pub mod memory;
pub mod serializer;

pub use fs::FsRepository;
pub use memory::{MemoryCache, MemoryRepository, MemoryTransactionEngine};
pub use serializer::StandardSerializer;

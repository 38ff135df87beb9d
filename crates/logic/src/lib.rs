//! Logic contract and cooperative interpreter
//!
//! Application logic is three pure functions over an opaque model
//! ([`Logic`]); everything it wants from the world is expressed as a
//! [`Command`]. The [`Interpreter`] runs one fact through the logic as a
//! single-threaded cooperative loop, fetching entities concurrently and
//! accumulating the run's premises, publications, derived facts, side
//! effects, and constants into a [`RunOutcome`].

pub mod command;
pub mod contract;
pub mod interpreter;

pub use command::{Command, ManyContinuation, OneContinuation, OutputCommand};
pub use contract::Logic;
pub use interpreter::{Interpreter, RunOutcome};

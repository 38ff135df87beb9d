//! The logic contract
//!
//! Application logic is three pure functions over an opaque model type.
//! The interpreter owns the model between calls; logic never sees shared
//! state and never performs I/O, which is what makes a run replayable.

use crate::command::{Command, OutputCommand};
use accrete_core::Fact;

/// Three pure functions driving one increment
pub trait Logic: Send + Sync + 'static {
    /// Opaque state threaded through the run
    type Model: Send;
    /// Messages produced by continuations and `Emit`
    type Message: Send;

    /// Start a run from the triggering fact
    fn begin(&self, fact: &Fact) -> (Self::Model, Command<Self::Message>);

    /// Advance the model by one message
    fn update(&self, model: Self::Model, message: Self::Message) -> (Self::Model, Command<Self::Message>);

    /// Close the run; called exactly once, after every message and
    /// retrieval has settled
    fn end(&self, model: Self::Model) -> OutputCommand;
}

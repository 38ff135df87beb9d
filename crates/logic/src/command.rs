//! The command algebra
//!
//! Application logic never performs I/O; it returns commands. The algebra
//! is a closed sum type dispatched by exhaustive matching: retrieval
//! commands carry a continuation mapping the result to the logic's own
//! message type, output commands describe what the increment should
//! publish. Closing the hierarchy keeps the interpreter total: there is
//! no "unknown command" path.

use accrete_core::{Entity, EntityId, SideEffect, Stamp, Value};

/// Continuation from one retrieved stamp to a logic message
pub type OneContinuation<M> = Box<dyn FnOnce(Stamp) -> M + Send>;

/// Continuation from a batch of retrieved stamps to a logic message
pub type ManyContinuation<M> = Box<dyn FnOnce(Vec<Stamp>) -> M + Send>;

/// A command returned by `begin` or `update`
pub enum Command<M> {
    /// Do nothing
    None,
    /// Feed a message back into `update`
    Emit(M),
    /// Retrieve the current stamp of one entity
    RetrieveOne {
        /// Entity to retrieve
        entity: EntityId,
        /// Continuation over the result
        then: OneContinuation<M>,
    },
    /// Retrieve the current stamps of several entities; the continuation
    /// sees them in the requested order
    RetrieveMany {
        /// Entities to retrieve
        entities: Vec<EntityId>,
        /// Continuation over the results
        then: ManyContinuation<M>,
    },
    /// Retrieve the snapshot stamp of a named set, resolved through the
    /// process-wide descriptor cache
    RetrieveSet {
        /// Set name
        name: String,
        /// Continuation over the snapshot stamp
        then: OneContinuation<M>,
    },
    /// Several commands, processed in order
    Batch(Vec<Command<M>>),
    /// An output contribution
    Output(OutputCommand),
}

impl<M> Command<M> {
    /// Do nothing
    pub fn none() -> Self {
        Command::None
    }

    /// Feed a message back into `update`
    pub fn emit(message: M) -> Self {
        Command::Emit(message)
    }

    /// Retrieve one entity
    pub fn retrieve_one(entity: EntityId, then: impl FnOnce(Stamp) -> M + Send + 'static) -> Self {
        Command::RetrieveOne { entity, then: Box::new(then) }
    }

    /// Retrieve several entities
    pub fn retrieve_many(
        entities: Vec<EntityId>,
        then: impl FnOnce(Vec<Stamp>) -> M + Send + 'static,
    ) -> Self {
        Command::RetrieveMany { entities, then: Box::new(then) }
    }

    /// Retrieve a named set snapshot
    pub fn retrieve_set(name: impl Into<String>, then: impl FnOnce(Stamp) -> M + Send + 'static) -> Self {
        Command::RetrieveSet { name: name.into(), then: Box::new(then) }
    }

    /// Several commands, processed in order
    pub fn batch(commands: Vec<Command<M>>) -> Self {
        Command::Batch(commands)
    }

    /// An output contribution
    pub fn output(output: OutputCommand) -> Self {
        Command::Output(output)
    }

    /// Publish an entity version
    pub fn publish(entity: Entity) -> Self {
        Command::Output(OutputCommand::Publish(entity))
    }

    /// The variant name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Command::None => "None",
            Command::Emit(_) => "Emit",
            Command::RetrieveOne { .. } => "RetrieveOne",
            Command::RetrieveMany { .. } => "RetrieveMany",
            Command::RetrieveSet { .. } => "RetrieveSet",
            Command::Batch(_) => "Batch",
            Command::Output(_) => "Output",
        }
    }
}

/// An output contribution of one increment
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    /// Contribute nothing
    None,
    /// Publish a new version of an entity
    Publish(Entity),
    /// Request a side effect after a successful commit
    SideEffect(SideEffect),
    /// Declare a derived fact, triggering a child increment
    DerivedFact(Entity),
    /// Declare a named constant on the record
    Constant {
        /// Constant name
        name: String,
        /// Constant value
        value: Value,
    },
    /// Emit a log line through the runtime's tracing
    Log(String),
    /// Several outputs, processed in order
    Batch(Vec<OutputCommand>),
}

impl OutputCommand {
    /// Publish a new version of an entity
    pub fn publish(id: EntityId, value: Value) -> Self {
        OutputCommand::Publish(Entity::new(id, value))
    }

    /// Request a side effect
    pub fn side_effect(name: impl Into<String>, payload: Value) -> Self {
        OutputCommand::SideEffect(SideEffect::new(name, payload))
    }

    /// Declare a derived fact
    pub fn derived_fact(id: EntityId, value: Value) -> Self {
        OutputCommand::DerivedFact(Entity::new(id, value))
    }

    /// Declare a named constant
    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        OutputCommand::Constant { name: name.into(), value }
    }

    /// Emit a log line
    pub fn log(message: impl Into<String>) -> Self {
        OutputCommand::Log(message.into())
    }

    /// Several outputs, processed in order
    pub fn batch(outputs: Vec<OutputCommand>) -> Self {
        OutputCommand::Batch(outputs)
    }
}

//! Shared fixtures for the scenario suite

use accrete::{Command, Entity, EntityId, Fact, Logic, OutputCommand, Stamp, Value};

/// Route runtime tracing into the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn entity(raw: &str) -> EntityId {
    EntityId::parse(raw).unwrap()
}

pub fn fact(raw: &str) -> Fact {
    Entity::new(entity(raw), Value::Int(1))
}

pub enum CounterMsg {
    Loaded(Stamp),
}

/// Read one counter entity and republish it incremented
pub struct CounterLogic {
    pub target: EntityId,
}

impl Logic for CounterLogic {
    type Model = ();
    type Message = CounterMsg;

    fn begin(&self, _fact: &Fact) -> ((), Command<CounterMsg>) {
        ((), Command::retrieve_one(self.target.clone(), CounterMsg::Loaded))
    }

    fn update(&self, model: (), message: CounterMsg) -> ((), Command<CounterMsg>) {
        let CounterMsg::Loaded(stamp) = message;
        let current = stamp.value.as_ref().and_then(Value::as_int).unwrap_or(0);
        let target = stamp.entity.clone();
        (
            model,
            Command::Output(OutputCommand::publish(target, Value::Int(current + 1))),
        )
    }

    fn end(&self, _model: ()) -> OutputCommand {
        OutputCommand::None
    }
}

//! The cooperative interpreter
//!
//! Runs one fact through user logic as a single-threaded loop: the
//! model/command cycle never executes two steps at once, while the entity
//! fetches it issues run concurrently with each other. Retrieval is
//! de-duplicated and memoized for the run's lifetime: at most one fetch
//! per distinct entity id. When the message queue is empty but fetches are
//! outstanding, the loop suspends on "any fetch completes" and then
//! rescans the whole pending set.
//!
//! A run fails only on an unhandled fault from the three callbacks, a
//! retrieval fault, budget exhaustion, or cancellation. It never partially
//! commits: the outcome is data handed to the scheduler.

use crate::command::{Command, ManyContinuation, OneContinuation, OutputCommand};
use crate::contract::Logic;
use accrete_core::descriptor;
use accrete_core::{
    CancelToken, EntityId, Error, Fact, IncrementInput, Result, RuntimeLimits, SideEffect, Stamp,
    StampSource, Value,
};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;

/// Everything one successful run produced
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Every stamp actually observed, with its premise flag; an entity is
    /// a premise iff its first retrieval resolved to an existing stamp
    pub inputs: Vec<IncrementInput>,
    /// The observed stamp per entity, for no-op elision at publish time
    pub observed: HashMap<EntityId, Stamp>,
    /// Entities the logic published, last write per entity wins
    pub published: BTreeMap<EntityId, Value>,
    /// Derived facts, in declaration order
    pub derived: Vec<accrete_core::Entity>,
    /// Requested side effects, in declaration order
    pub side_effects: Vec<SideEffect>,
    /// Declared constants
    pub constants: BTreeMap<String, Value>,
}

/// One unresolved retrieve command
enum Pending<M> {
    One { entity: EntityId, then: OneContinuation<M> },
    Many { entities: Vec<EntityId>, then: ManyContinuation<M> },
}

/// Interpreter for one fact at a time
pub struct Interpreter {
    limits: RuntimeLimits,
}

impl Interpreter {
    /// An interpreter with the given limits
    pub fn new(limits: RuntimeLimits) -> Self {
        Interpreter { limits }
    }

    /// Run one fact through the logic to completion.
    ///
    /// # Errors
    ///
    /// Faults from the logic callbacks (wrapped as exceptions), retrieval
    /// failures, budget exhaustion, and cancellation all abort the run;
    /// the scheduler retries it wholesale.
    pub async fn run<L: Logic>(
        &self,
        logic: &L,
        fact: &Fact,
        source: Arc<dyn StampSource>,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        cancel.ensure_active()?;

        let mut state: RunState<L::Message> = RunState::new();
        let (mut model, seed) = guard(|| logic.begin(fact))?;
        state.enqueue(seed)?;
        state.launch_fetches(&source, cancel)?;

        let mut steps: u32 = 0;
        loop {
            cancel.ensure_active()?;
            state.resolve_ready()?;

            if let Some(message) = state.queue.pop_front() {
                steps += 1;
                if steps > self.limits.update_budget {
                    return Err(Error::exception(format!(
                        "update budget of {} exhausted",
                        self.limits.update_budget
                    )));
                }
                let (next, command) = guard(AssertUnwindSafe(|| logic.update(model, message)))?;
                model = next;
                state.enqueue(command)?;
                state.launch_fetches(&source, cancel)?;
                continue;
            }

            if !state.fetches.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    joined = state.fetches.join_next() => match joined {
                        Some(Ok((entity, Ok(stamp)))) => state.record_fetch(entity, stamp),
                        Some(Ok((_, Err(err)))) => return Err(err),
                        Some(Err(fault)) => {
                            return Err(Error::exception(format!("entity fetch task failed: {fault}")))
                        }
                        None => {}
                    },
                }
                continue;
            }

            break;
        }
        debug_assert!(state.pending.is_empty(), "no retrieval may outlive the drain loop");

        let output = guard(AssertUnwindSafe(|| logic.end(model)))?;
        state.apply_output(output);
        Ok(state.outcome)
    }
}

struct RunState<M> {
    queue: VecDeque<M>,
    pending: Vec<Pending<M>>,
    /// memoized fetches; `None` payload means in flight
    memo: HashMap<EntityId, Option<Stamp>>,
    to_fetch: Vec<EntityId>,
    fetches: JoinSet<(EntityId, Result<Stamp>)>,
    outcome: RunOutcome,
}

impl<M> RunState<M> {
    fn new() -> Self {
        RunState {
            queue: VecDeque::new(),
            pending: Vec::new(),
            memo: HashMap::new(),
            to_fetch: Vec::new(),
            fetches: JoinSet::new(),
            outcome: RunOutcome::default(),
        }
    }

    /// Fold one command into the run state
    fn enqueue(&mut self, command: Command<M>) -> Result<()> {
        match command {
            Command::None => {}
            Command::Emit(message) => self.queue.push_back(message),
            Command::RetrieveOne { entity, then } => {
                self.note_entity(&entity);
                self.pending.push(Pending::One { entity, then });
            }
            Command::RetrieveMany { entities, then } => {
                for entity in &entities {
                    self.note_entity(entity);
                }
                self.pending.push(Pending::Many { entities, then });
            }
            Command::RetrieveSet { name, then } => {
                if name.is_empty() {
                    return Err(Error::exception("set name must be non-empty"));
                }
                let entity = descriptor::set_snapshot_entity(&name);
                self.note_entity(&entity);
                self.pending.push(Pending::One { entity, then });
            }
            Command::Batch(commands) => {
                for command in commands {
                    self.enqueue(command)?;
                }
            }
            Command::Output(output) => self.apply_output(output),
        }
        Ok(())
    }

    /// Mark an entity for fetching unless a fetch is memoized already
    fn note_entity(&mut self, entity: &EntityId) {
        if !self.memo.contains_key(entity) {
            self.memo.insert(entity.clone(), None);
            self.to_fetch.push(entity.clone());
        }
    }

    /// Launch every marked fetch; checked against the token before I/O
    fn launch_fetches(&mut self, source: &Arc<dyn StampSource>, cancel: &CancelToken) -> Result<()> {
        if self.to_fetch.is_empty() {
            return Ok(());
        }
        cancel.ensure_active()?;
        for entity in self.to_fetch.drain(..) {
            let source = Arc::clone(source);
            self.fetches.spawn(async move {
                let stamp = source.current(&entity).await;
                (entity, stamp)
            });
        }
        Ok(())
    }

    /// Memoize one completed fetch and record it as an input.
    ///
    /// An existing stamp is a premise; a confirmed absence is observed but
    /// never premised on.
    fn record_fetch(&mut self, entity: EntityId, stamp: Stamp) {
        self.outcome.inputs.push(IncrementInput {
            key: stamp.key(),
            premise: !stamp.is_empty(),
        });
        self.outcome.observed.insert(entity.clone(), stamp.clone());
        self.memo.insert(entity, Some(stamp));
    }

    /// Rescan the whole pending set, turning every fully memoized
    /// retrieval into a message
    fn resolve_ready(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut still_pending = Vec::new();
        for pending in std::mem::take(&mut self.pending) {
            if self.is_ready(&pending) {
                let message = self.resolve(pending)?;
                self.queue.push_back(message);
            } else {
                still_pending.push(pending);
            }
        }
        self.pending = still_pending;
        Ok(())
    }

    fn is_ready(&self, pending: &Pending<M>) -> bool {
        match pending {
            Pending::One { entity, .. } => matches!(self.memo.get(entity), Some(Some(_))),
            Pending::Many { entities, .. } => entities
                .iter()
                .all(|entity| matches!(self.memo.get(entity), Some(Some(_)))),
        }
    }

    fn resolve(&self, pending: Pending<M>) -> Result<M> {
        match pending {
            Pending::One { entity, then } => {
                let stamp = self.memoized(&entity);
                guard(AssertUnwindSafe(move || then(stamp)))
            }
            Pending::Many { entities, then } => {
                let stamps: Vec<Stamp> = entities.iter().map(|e| self.memoized(e)).collect();
                guard(AssertUnwindSafe(move || then(stamps)))
            }
        }
    }

    fn memoized(&self, entity: &EntityId) -> Stamp {
        match self.memo.get(entity) {
            Some(Some(stamp)) => stamp.clone(),
            _ => unreachable!("resolve is only called on fully memoized retrievals"),
        }
    }

    /// Fold one output contribution into the outcome
    fn apply_output(&mut self, output: OutputCommand) {
        match output {
            OutputCommand::None => {}
            OutputCommand::Publish(entity) => {
                self.outcome.published.insert(entity.id, entity.value);
            }
            OutputCommand::SideEffect(effect) => self.outcome.side_effects.push(effect),
            OutputCommand::DerivedFact(entity) => self.outcome.derived.push(entity),
            OutputCommand::Constant { name, value } => {
                self.outcome.constants.insert(name, value);
            }
            OutputCommand::Log(message) => info!(target: "accrete::logic", "{message}"),
            OutputCommand::Batch(outputs) => {
                for output in outputs {
                    self.apply_output(output);
                }
            }
        }
    }
}

/// Run a logic callback, turning a panic into an exception error
fn guard<T>(callback: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(callback))
        .map_err(|payload| Error::exception(panic_text(payload.as_ref())))
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_core::{Entity, IncrementId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn entity(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn interpreter() -> Interpreter {
        Interpreter::new(RuntimeLimits::default())
    }

    fn fact() -> Fact {
        Entity::new(entity("order/1"), Value::Int(1))
    }

    /// Map-backed stamp source counting every fetch
    #[derive(Default)]
    struct MapSource {
        stamps: Mutex<HashMap<EntityId, Stamp>>,
        fetches: AtomicUsize,
    }

    impl MapSource {
        fn with(stamps: Vec<Stamp>) -> Arc<Self> {
            let source = MapSource::default();
            {
                let mut map = source.stamps.lock().unwrap();
                for stamp in stamps {
                    map.insert(stamp.entity.clone(), stamp);
                }
            }
            Arc::new(source)
        }
    }

    #[async_trait]
    impl StampSource for MapSource {
        async fn current(&self, entity: &EntityId) -> Result<Stamp> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .stamps
                .lock()
                .unwrap()
                .get(entity)
                .cloned()
                .unwrap_or_else(|| Stamp::absent(entity.clone())))
        }
    }

    // ====================================================================
    // Logic fixtures
    // ====================================================================

    /// Logic that issues no commands at all
    struct TrivialLogic;

    impl Logic for TrivialLogic {
        type Model = ();
        type Message = ();

        fn begin(&self, _fact: &Fact) -> ((), Command<()>) {
            ((), Command::none())
        }

        fn update(&self, model: (), _message: ()) -> ((), Command<()>) {
            (model, Command::none())
        }

        fn end(&self, _model: ()) -> OutputCommand {
            OutputCommand::None
        }
    }

    enum CounterMsg {
        Loaded(Stamp),
    }

    /// Read one counter entity and republish it incremented
    struct CounterLogic {
        target: EntityId,
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

    enum PairMsg {
        Both(Vec<Stamp>),
    }

    /// Retrieve two entities at once and publish their sum
    struct SumLogic {
        left: EntityId,
        right: EntityId,
        out: EntityId,
    }

    impl Logic for SumLogic {
        type Model = ();
        type Message = PairMsg;

        fn begin(&self, _fact: &Fact) -> ((), Command<PairMsg>) {
            (
                (),
                Command::retrieve_many(vec![self.left.clone(), self.right.clone()], PairMsg::Both),
            )
        }

        fn update(&self, model: (), message: PairMsg) -> ((), Command<PairMsg>) {
            let PairMsg::Both(stamps) = message;
            let total: i64 = stamps
                .iter()
                .map(|s| s.value.as_ref().and_then(Value::as_int).unwrap_or(0))
                .sum();
            (
                model,
                Command::Output(OutputCommand::publish(self.out.clone(), Value::Int(total))),
            )
        }

        fn end(&self, _model: ()) -> OutputCommand {
            OutputCommand::None
        }
    }

    enum DedupMsg {
        First(Stamp),
        Second(Stamp),
    }

    /// Two separate retrieves of the same entity: one fetch, two messages
    struct DedupLogic {
        target: EntityId,
    }

    impl Logic for DedupLogic {
        type Model = u32;
        type Message = DedupMsg;

        fn begin(&self, _fact: &Fact) -> (u32, Command<DedupMsg>) {
            (
                0,
                Command::batch(vec![
                    Command::retrieve_one(self.target.clone(), DedupMsg::First),
                    Command::retrieve_one(self.target.clone(), DedupMsg::Second),
                ]),
            )
        }

        fn update(&self, model: u32, _message: DedupMsg) -> (u32, Command<DedupMsg>) {
            (model + 1, Command::none())
        }

        fn end(&self, model: u32) -> OutputCommand {
            OutputCommand::constant("deliveries", Value::Int(i64::from(model)))
        }
    }

    /// Emits messages forever; must trip the update budget
    struct RunawayLogic;

    impl Logic for RunawayLogic {
        type Model = ();
        type Message = ();

        fn begin(&self, _fact: &Fact) -> ((), Command<()>) {
            ((), Command::emit(()))
        }

        fn update(&self, model: (), _message: ()) -> ((), Command<()>) {
            (model, Command::emit(()))
        }

        fn end(&self, _model: ()) -> OutputCommand {
            OutputCommand::None
        }
    }

    /// Panics inside `update`
    struct FaultyLogic;

    impl Logic for FaultyLogic {
        type Model = ();
        type Message = ();

        fn begin(&self, _fact: &Fact) -> ((), Command<()>) {
            ((), Command::emit(()))
        }

        fn update(&self, _model: (), _message: ()) -> ((), Command<()>) {
            panic!("logic fault");
        }

        fn end(&self, _model: ()) -> OutputCommand {
            OutputCommand::None
        }
    }

    /// Emits every output kind from `end`
    struct OutputsLogic {
        out: EntityId,
    }

    impl Logic for OutputsLogic {
        type Model = ();
        type Message = ();

        fn begin(&self, _fact: &Fact) -> ((), Command<()>) {
            ((), Command::none())
        }

        fn update(&self, model: (), _message: ()) -> ((), Command<()>) {
            (model, Command::none())
        }

        fn end(&self, _model: ()) -> OutputCommand {
            OutputCommand::batch(vec![
                OutputCommand::publish(self.out.clone(), Value::Int(7)),
                OutputCommand::side_effect("notify", Value::String("ops".into())),
                OutputCommand::derived_fact(entity("audit/outputs"), Value::Null),
                OutputCommand::constant("limit", Value::Int(10)),
                OutputCommand::log("closing"),
            ])
        }
    }

    // ====================================================================
    // Tests
    // ====================================================================

    #[tokio::test]
    async fn trivial_logic_yields_empty_outcome() {
        let outcome = interpreter()
            .run(&TrivialLogic, &fact(), MapSource::with(vec![]), &CancelToken::new())
            .await
            .unwrap();
        assert!(outcome.inputs.is_empty());
        assert!(outcome.published.is_empty());
        assert!(outcome.derived.is_empty());
        assert!(outcome.side_effects.is_empty());
    }

    #[tokio::test]
    async fn existing_stamp_becomes_a_premise() {
        let target = entity("counter/a");
        let source = MapSource::with(vec![Stamp::new(
            target.clone(),
            IncrementId::generate(),
            Value::Int(4),
        )]);
        let outcome = interpreter()
            .run(&CounterLogic { target: target.clone() }, &fact(), source, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.inputs.len(), 1);
        assert!(outcome.inputs[0].premise);
        assert_eq!(outcome.inputs[0].key.entity, target);
        assert_eq!(outcome.published.get(&target), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn absent_stamp_is_observed_but_not_premised() {
        let target = entity("counter/a");
        let outcome = interpreter()
            .run(
                &CounterLogic { target: target.clone() },
                &fact(),
                MapSource::with(vec![]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.inputs.len(), 1);
        assert!(!outcome.inputs[0].premise);
        // Publishing after confirmed absence is still an output.
        assert_eq!(outcome.published.get(&target), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn retrieve_many_delivers_in_requested_order() {
        let left = entity("num/left");
        let right = entity("num/right");
        let out = entity("num/sum");
        let source = MapSource::with(vec![
            Stamp::new(left.clone(), IncrementId::generate(), Value::Int(2)),
            Stamp::new(right.clone(), IncrementId::generate(), Value::Int(3)),
        ]);
        let logic = SumLogic { left, right, out: out.clone() };
        let outcome = interpreter()
            .run(&logic, &fact(), source, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.published.get(&out), Some(&Value::Int(5)));
        assert_eq!(outcome.inputs.len(), 2);
    }

    #[tokio::test]
    async fn fetches_are_deduplicated_and_memoized() {
        let target = entity("counter/a");
        let source = MapSource::with(vec![Stamp::new(
            target.clone(),
            IncrementId::generate(),
            Value::Int(1),
        )]);
        let outcome = interpreter()
            .run(
                &DedupLogic { target: target.clone() },
                &fact(),
                Arc::clone(&source) as Arc<dyn StampSource>,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // Both continuations delivered, exactly one fetch issued, exactly
        // one input recorded.
        assert_eq!(outcome.constants.get("deliveries"), Some(&Value::Int(2)));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.inputs.len(), 1);
    }

    #[tokio::test]
    async fn update_budget_exhaustion_fails_the_run() {
        let limits = RuntimeLimits { update_budget: 16, ..RuntimeLimits::default() };
        let err = Interpreter::new(limits)
            .run(&RunawayLogic, &fact(), MapSource::with(vec![]), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("budget"));
    }

    #[tokio::test]
    async fn logic_panic_becomes_exception() {
        let err = interpreter()
            .run(&FaultyLogic, &fact(), MapSource::with(vec![]), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exception(_)));
        assert!(err.to_string().contains("logic fault"));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_immediately() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = interpreter()
            .run(&TrivialLogic, &fact(), MapSource::with(vec![]), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn retrieval_fault_aborts_the_run() {
        struct FailingSource;

        #[async_trait]
        impl StampSource for FailingSource {
            async fn current(&self, _entity: &EntityId) -> Result<Stamp> {
                Err(Error::exception("backend down"))
            }
        }

        let err = interpreter()
            .run(
                &CounterLogic { target: entity("counter/a") },
                &fact(),
                Arc::new(FailingSource),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("backend down"));
    }

    #[tokio::test]
    async fn end_outputs_are_processed_identically() {
        let out = entity("report/daily");
        let outcome = interpreter()
            .run(
                &OutputsLogic { out: out.clone() },
                &fact(),
                MapSource::with(vec![]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.published.get(&out), Some(&Value::Int(7)));
        assert_eq!(outcome.side_effects.len(), 1);
        assert_eq!(outcome.side_effects[0].name, "notify");
        assert_eq!(outcome.derived.len(), 1);
        assert_eq!(outcome.constants.get("limit"), Some(&Value::Int(10)));
    }

    #[tokio::test]
    async fn retrieve_set_resolves_through_descriptor_cache() {
        enum SetMsg {
            Snapshot(Stamp),
        }

        struct SetLogic;

        impl Logic for SetLogic {
            type Model = Option<Stamp>;
            type Message = SetMsg;

            fn begin(&self, _fact: &Fact) -> (Option<Stamp>, Command<SetMsg>) {
                (None, Command::retrieve_set("open-orders", SetMsg::Snapshot))
            }

            fn update(&self, _model: Option<Stamp>, message: SetMsg) -> (Option<Stamp>, Command<SetMsg>) {
                let SetMsg::Snapshot(stamp) = message;
                (Some(stamp), Command::none())
            }

            fn end(&self, model: Option<Stamp>) -> OutputCommand {
                match model {
                    Some(stamp) if !stamp.is_empty() => {
                        OutputCommand::constant("snapshot", stamp.value.unwrap_or(Value::Null))
                    }
                    _ => OutputCommand::None,
                }
            }
        }

        let snapshot_entity = accrete_core::descriptor::set_snapshot_entity("open-orders");
        let source = MapSource::with(vec![Stamp::new(
            snapshot_entity.clone(),
            IncrementId::generate(),
            Value::Array(vec![Value::String("order/1".into())]),
        )]);
        let outcome = interpreter()
            .run(&SetLogic, &fact(), source, &CancelToken::new())
            .await
            .unwrap();
        assert!(outcome.constants.contains_key("snapshot"));
        assert_eq!(outcome.inputs[0].key.entity, snapshot_entity);
    }
}

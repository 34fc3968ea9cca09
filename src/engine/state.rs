// State contract: the hooks every state implements and the lifecycle the
// engine drives on top of them.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::context::Context;
use crate::engine::report::ReportLevel;
use crate::engine::settings::Settings;
use crate::engine::state_machine::StateMachine;
use crate::engine::types::{
    outcomes, Inconsistencies, Inconsistency, NestedName, Outcome, Outcomes, Progress, StateName,
    StateType,
};
use crate::observability::{execution_metrics, ExecutionTimer};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("State '{state}' is inconsistent:\n{inconsistencies}")]
    Inconsistent {
        state: String,
        inconsistencies: Inconsistencies,
    },
    #[error("State '{state}' is already executing")]
    AlreadyRunning { state: String },
    #[error("Execution of '{state}' has not been started")]
    NotStarted { state: String },
    #[error("The outcome of the last execution of '{state}' has not been collected")]
    OutcomeNotCollected { state: String },
    #[error("Execution thread of '{state}' failed: {reason}")]
    WorkerFailed { state: String, reason: String },
}

/// Data and flags shared by every state implementation.
#[derive(Debug)]
pub struct StateBase {
    name: StateName,
    state_type: StateType,
    nested_name: NestedName,
    outcomes: Outcomes,
    nominal_outcome: Option<Outcome>,
    context: Arc<Context>,
    preemption_requested: AtomicBool,
    running: AtomicBool,
}

impl StateBase {
    pub fn new(name: StateName, state_type: StateType, context: Arc<Context>) -> Self {
        Self {
            nested_name: NestedName::root(name.clone()),
            name,
            state_type,
            outcomes: Outcomes::default(),
            nominal_outcome: None,
            context,
            preemption_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &StateName {
        &self.name
    }

    pub fn state_type(&self) -> &StateType {
        &self.state_type
    }

    pub fn nested_name(&self) -> &NestedName {
        &self.nested_name
    }

    pub fn outcomes(&self) -> &Outcomes {
        &self.outcomes
    }

    /// Replaces the outcome set. The reserved outcomes stay members.
    pub fn set_outcomes(&mut self, outcomes: Outcomes) {
        self.outcomes = outcomes;
    }

    pub fn nominal_outcome(&self) -> Option<&Outcome> {
        self.nominal_outcome.as_ref()
    }

    pub fn set_nominal_outcome(&mut self, outcome: Outcome) {
        self.nominal_outcome = Some(outcome);
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn is_preemption_requested(&self) -> bool {
        self.preemption_requested.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Adds a report entry attributed to this state.
    pub fn report(&self, level: ReportLevel, message: impl Into<String>) {
        self.context
            .add_simple_entry(&self.nested_name, level, message);
    }

    pub(crate) fn set_parent(&mut self, parent: &NestedName) {
        self.nested_name = parent.child(&self.name);
    }
}

/// Access to the concrete type behind a `dyn State`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Hooks implemented by a state. Only `run_mid_execution` is mandatory.
///
/// Execution hooks take `&self`: `request_preemption` and `progress` are
/// called from other threads while the state executes, so mutable execution
/// data lives behind locks inside the implementation.
pub trait State: AsAny + Send + Sync {
    fn base(&self) -> &StateBase;
    fn base_mut(&mut self) -> &mut StateBase;

    /// Called once right after creation. Must not connect to external systems.
    fn construct_impl(&mut self) -> bool {
        true
    }

    fn inconsistencies_impl(&self) -> Inconsistencies {
        Inconsistencies::new()
    }

    fn save_settings_impl(&self, _settings: &mut Settings) {}

    fn load_settings_impl(&mut self, _settings: &Settings) -> bool {
        true
    }

    fn run_pre_execution(&self) {}

    /// The state's actual work. Produces exactly one outcome.
    fn run_mid_execution(&self) -> Outcome;

    /// Always called after `run_mid_execution`, whatever happened there.
    fn run_post_execution(&self) {}

    /// Must not block.
    fn on_preemption_request(&self) {}

    fn progress_impl(&self) -> Progress {
        Progress::default()
    }

    fn as_state_machine(&self) -> Option<&StateMachine> {
        None
    }

    fn as_state_machine_mut(&mut self) -> Option<&mut StateMachine> {
        None
    }
}

impl dyn State {
    pub fn downcast_ref<T: State>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: State>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: State>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Lifecycle operations the engine provides for every state.
pub trait StateExt: State {
    fn name(&self) -> &StateName {
        self.base().name()
    }

    fn state_type(&self) -> &StateType {
        self.base().state_type()
    }

    fn nested_name(&self) -> &NestedName {
        self.base().nested_name()
    }

    fn outcomes(&self) -> &Outcomes {
        self.base().outcomes()
    }

    fn nominal_outcome(&self) -> Option<&Outcome> {
        self.base().nominal_outcome()
    }

    fn context(&self) -> &Arc<Context> {
        self.base().context()
    }

    fn construct(&mut self) -> bool {
        let constructed = self.construct_impl();
        if !constructed {
            warn!(state = %self.nested_name(), state_type = %self.state_type(), "State construction failed");
        }
        constructed
    }

    /// Side-effect free validation; execution is refused unless empty.
    fn inconsistencies(&self) -> Inconsistencies {
        let base = self.base();
        let mut inconsistencies = Inconsistencies::new();
        if let Some(nominal) = base.nominal_outcome() {
            if !base.outcomes().contains(nominal) {
                inconsistencies.add(Inconsistency::new(format!(
                    "The nominal outcome '{}' of '{}' is not one of its outcomes {}.",
                    nominal,
                    base.nested_name(),
                    base.outcomes()
                )));
            }
        }
        inconsistencies.extend(self.inconsistencies_impl());
        inconsistencies
    }

    fn save_settings(&self) -> Settings {
        let mut settings = Settings::new();
        self.save_settings_impl(&mut settings);
        settings
    }

    fn load_settings(&mut self, settings: &Settings) -> bool {
        let loaded = self.load_settings_impl(settings);
        if !loaded {
            warn!(state = %self.nested_name(), "State rejected its settings");
        }
        loaded
    }

    /// Runs one pre/mid/post cycle on the calling thread.
    fn execute(&self) -> Result<Outcome, ExecutionError> {
        begin_execution(self)?;
        Ok(run_cycle(self))
    }

    /// Non-blocking. Ignored unless the state is executing.
    fn request_preemption(&self) {
        let base = self.base();
        if !base.is_running() {
            debug!(state = %base.nested_name(), "Ignoring preemption request, state is not executing");
            return;
        }
        base.preemption_requested.store(true, Ordering::SeqCst);
        debug!(state = %base.nested_name(), "Preemption requested");
        self.on_preemption_request();
    }

    fn is_preemption_requested(&self) -> bool {
        self.base().is_preemption_requested()
    }

    fn is_running(&self) -> bool {
        self.base().is_running()
    }

    /// Safe to call from any thread while the state executes.
    fn progress(&self) -> Progress {
        self.progress_impl()
    }
}

impl<S: State + ?Sized> StateExt for S {}

/// Refuses inconsistent or already running states, then marks the state running.
pub(crate) fn begin_execution<S: State + ?Sized>(state: &S) -> Result<(), ExecutionError> {
    let inconsistencies = state.inconsistencies();
    if !inconsistencies.is_empty() {
        return Err(ExecutionError::Inconsistent {
            state: state.nested_name().to_string(),
            inconsistencies,
        });
    }
    mark_running(state.base())
}

/// Marks a state running without checking it. Used for children of a
/// machine that has already been checked as a whole.
pub(crate) fn mark_running(base: &StateBase) -> Result<(), ExecutionError> {
    base.running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map_err(|_| ExecutionError::AlreadyRunning {
            state: base.nested_name().to_string(),
        })?;
    base.preemption_requested.store(false, Ordering::SeqCst);
    Ok(())
}

/// Clears the running and preemption flags.
pub(crate) fn end_execution(base: &StateBase) {
    base.preemption_requested.store(false, Ordering::SeqCst);
    base.running.store(false, Ordering::SeqCst);
}

/// Runs pre, mid and post on a state already marked running. Post runs
/// exactly once; panics become `failure`.
pub(crate) fn run_cycle<S: State + ?Sized>(state: &S) -> Outcome {
    let base = state.base();
    let name = base.nested_name();
    let timer = ExecutionTimer::new(name);
    debug!(state = %name, "Starting state execution");

    let mut outcome = match catch_unwind(AssertUnwindSafe(|| state.run_pre_execution())) {
        Ok(()) => match catch_unwind(AssertUnwindSafe(|| state.run_mid_execution())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                base.report(
                    ReportLevel::Error,
                    format!("Execution aborted: {}", panic_message(payload.as_ref())),
                );
                outcomes::failure()
            }
        },
        Err(payload) => {
            base.report(
                ReportLevel::Error,
                format!("Preparing the execution failed: {}", panic_message(payload.as_ref())),
            );
            outcomes::failure()
        }
    };

    if !base.outcomes().contains(&outcome) {
        base.report(
            ReportLevel::Error,
            format!(
                "Returned undeclared outcome '{}', expected one of {}.",
                outcome,
                base.outcomes()
            ),
        );
        outcome = outcomes::failure();
    }

    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| state.run_post_execution())) {
        base.report(
            ReportLevel::Error,
            format!("Cleaning up the execution failed: {}", panic_message(payload.as_ref())),
        );
        outcome = outcomes::failure();
    }

    end_execution(base);

    execution_metrics().record_outcome(&outcome);
    timer.finish(&outcome);
    info!(state = %name, outcome = %outcome, "State execution finished");
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

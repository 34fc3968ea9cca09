// Run phase of an executor: Idle -> Running -> (Preempting) -> Finished

use serde::{Deserialize, Serialize};
use statig::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Preempting,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Preempt,
    Finish { outcome: String },
}

#[derive(Debug, Default)]
pub struct ExecutionLifecycle {
    phase: Phase,
    runs: u32,
    last_outcome: Option<String>,
}

/// Lifecycle tracker owned by an executor.
pub(crate) struct LifecycleMachine(StateMachine<ExecutionLifecycle>);

impl LifecycleMachine {
    pub(crate) fn start() -> Self {
        Self(ExecutionLifecycle::new().state_machine())
    }

    pub(crate) fn handle(&mut self, event: &LifecycleEvent) {
        self.0.handle(event);
    }

    pub(crate) fn inner(&self) -> &ExecutionLifecycle {
        self.0.inner()
    }
}

impl ExecutionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn last_outcome(&self) -> Option<&str> {
        self.last_outcome.as_deref()
    }

    fn begin_run(&mut self) {
        self.phase = Phase::Running;
        self.runs += 1;
        self.last_outcome = None;
    }

    fn finish(&mut self, outcome: &str) {
        self.phase = Phase::Finished;
        self.last_outcome = Some(outcome.to_string());
    }
}

#[state_machine(initial = "State::idle()")]
impl ExecutionLifecycle {
    #[state]
    fn idle(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Start => {
                self.begin_run();
                Transition(State::running())
            }
            _ => Handled,
        }
    }

    #[state]
    fn running(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Preempt => {
                self.phase = Phase::Preempting;
                Transition(State::preempting())
            }
            LifecycleEvent::Finish { outcome } => {
                self.finish(outcome);
                Transition(State::finished())
            }
            LifecycleEvent::Start => Handled,
        }
    }

    #[state]
    fn preempting(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Finish { outcome } => {
                self.finish(outcome);
                Transition(State::finished())
            }
            _ => Handled,
        }
    }

    #[state]
    fn finished(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Start => {
                self.begin_run();
                Transition(State::running())
            }
            _ => Handled,
        }
    }
}

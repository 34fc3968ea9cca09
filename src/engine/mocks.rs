// Scripted states for testing - no external systems, every call recorded

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::context::Context;
use crate::engine::report::Report;
use crate::engine::state::{State, StateBase};
use crate::engine::state_machine::StateMachine;
use crate::engine::types::{
    outcomes, Inconsistencies, Inconsistency, Outcome, Outcomes, Progress, StateName, StateType,
};

/// Context writing into an in-memory report the test can inspect.
pub fn test_context() -> (Arc<Context>, Arc<Report>) {
    let report = Arc::new(Report::new());
    let context = Context::builder().report_sink(report.clone()).build();
    (Arc::new(context), report)
}

/// Empty machine declaring `success` besides the reserved outcomes.
pub fn machine(name: &str, context: Arc<Context>) -> StateMachine {
    let mut base = StateBase::new(
        StateName::new(name),
        StateType::new(StateMachine::TYPE),
        context,
    );
    base.set_outcomes(Outcomes::new([outcomes::success()]));
    StateMachine::new(base)
}

/// Hook a scripted state panics in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicPoint {
    Pre,
    Mid,
    Post,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub pre: usize,
    pub mid: usize,
    pub post: usize,
    pub preemption_requests: usize,
}

/// Leaf state returning a fixed outcome, optionally after a delay that
/// ignores preemption.
#[derive(Debug)]
pub struct ScriptedState {
    base: StateBase,
    outcome: Outcome,
    delay: Duration,
    panic_point: Option<PanicPoint>,
    problems: Vec<Inconsistency>,
    calls: Mutex<CallCounts>,
}

impl ScriptedState {
    pub const TYPE: &'static str = "ScriptedState";

    pub fn new(name: &str, context: Arc<Context>, outcome: Outcome) -> Self {
        let mut base = StateBase::new(StateName::new(name), StateType::new(Self::TYPE), context);
        base.set_outcomes(Outcomes::new([outcomes::success()]));
        Self {
            base,
            outcome,
            delay: Duration::ZERO,
            panic_point: None,
            problems: Vec::new(),
            calls: Mutex::new(CallCounts::default()),
        }
    }

    pub fn panicking(name: &str, context: Arc<Context>) -> Self {
        Self::panicking_in(name, context, PanicPoint::Mid)
    }

    pub fn panicking_in(name: &str, context: Arc<Context>, point: PanicPoint) -> Self {
        let mut state = Self::new(name, context, outcomes::success());
        state.panic_point = Some(point);
        state
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn panic_at(&self, point: PanicPoint) {
        if self.panic_point == Some(point) {
            panic!("scripted panic in {}", self.base.name());
        }
    }

    pub fn add_problem(&mut self, description: &str) {
        self.problems.push(Inconsistency::new(description));
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }
}

impl State for ScriptedState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn inconsistencies_impl(&self) -> Inconsistencies {
        let mut inconsistencies = Inconsistencies::new();
        for problem in &self.problems {
            inconsistencies.add(problem.clone());
        }
        inconsistencies
    }

    fn run_pre_execution(&self) {
        self.calls.lock().unwrap().pre += 1;
        self.panic_at(PanicPoint::Pre);
    }

    fn run_mid_execution(&self) -> Outcome {
        self.calls.lock().unwrap().mid += 1;
        self.panic_at(PanicPoint::Mid);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.outcome.clone()
    }

    fn run_post_execution(&self) {
        self.calls.lock().unwrap().post += 1;
        self.panic_at(PanicPoint::Post);
    }

    fn on_preemption_request(&self) {
        self.calls.lock().unwrap().preemption_requests += 1;
    }
}

/// Leaf state that works until preempted, reporting elapsed polls as progress.
#[derive(Debug)]
pub struct BlockingState {
    base: StateBase,
    limit: Duration,
    polls: Mutex<u32>,
    calls: Mutex<CallCounts>,
}

impl BlockingState {
    pub const TYPE: &'static str = "BlockingState";
    pub const POLL_GOAL: u32 = 1000;

    pub fn new(name: &str, context: Arc<Context>) -> Self {
        let mut base = StateBase::new(StateName::new(name), StateType::new(Self::TYPE), context);
        base.set_outcomes(Outcomes::new([outcomes::success()]));
        Self {
            base,
            limit: Duration::from_secs(5),
            polls: Mutex::new(0),
            calls: Mutex::new(CallCounts::default()),
        }
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }
}

impl State for BlockingState {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn run_pre_execution(&self) {
        self.calls.lock().unwrap().pre += 1;
        *self.polls.lock().unwrap() = 0;
    }

    fn run_mid_execution(&self) -> Outcome {
        self.calls.lock().unwrap().mid += 1;
        let started = Instant::now();
        while started.elapsed() < self.limit {
            if self.base.is_preemption_requested() {
                return outcomes::preemption();
            }
            *self.polls.lock().unwrap() += 1;
            self.base.context().clock().sleep(Duration::from_millis(2));
        }
        outcomes::success()
    }

    fn run_post_execution(&self) {
        self.calls.lock().unwrap().post += 1;
    }

    fn on_preemption_request(&self) {
        self.calls.lock().unwrap().preemption_requests += 1;
    }

    fn progress_impl(&self) -> Progress {
        let polls = *self.polls.lock().unwrap();
        Progress::new(f64::from(Self::POLL_GOAL), f64::from(polls), "polls")
    }
}

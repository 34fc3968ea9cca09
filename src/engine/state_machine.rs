// Composite state: owns child states and walks them along a transition table

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::report::ReportLevel;
use crate::engine::settings::{Parameter, Settings};
use crate::engine::state::{mark_running, run_cycle, State, StateBase, StateExt};
use crate::engine::types::{
    outcomes, Inconsistencies, Inconsistency, NestedName, Outcome, Progress, StateName,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("State machine '{machine}' already contains a state named '{name}'")]
    DuplicateState { machine: String, name: String },
    #[error("State machine '{machine}' has no state named '{name}'")]
    UnknownState { machine: String, name: String },
}

/// Where a child's outcome leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Continue with the named sibling.
    To(StateName),
    /// Stop and return this outcome from the machine.
    Exit(Outcome),
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::To(name) => write!(f, "{name}"),
            Transition::Exit(outcome) => write!(f, "{outcome}"),
        }
    }
}

/// Outcome → transition entries of one child.
pub type TransitionMap = BTreeMap<Outcome, Transition>;

/// Transitions wiring a child's reserved outcomes straight out of the machine.
pub fn default_transitions() -> TransitionMap {
    TransitionMap::from([
        (outcomes::preemption(), Transition::Exit(outcomes::preemption())),
        (outcomes::failure(), Transition::Exit(outcomes::failure())),
    ])
}

pub struct StateMachine {
    base: StateBase,
    children: Vec<Box<dyn State>>,
    transitions: BTreeMap<StateName, TransitionMap>,
    default_initial_state: Option<StateName>,
    restart_on_execution: bool,
    resume_state: Mutex<Option<StateName>>,
    active_state: RwLock<Option<usize>>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<&StateName> = self.children.iter().map(|c| c.name()).collect();
        f.debug_struct("StateMachine")
            .field("name", &self.base.nested_name().to_string())
            .field("children", &children)
            .field("default_initial_state", &self.default_initial_state)
            .field("restart_on_execution", &self.restart_on_execution)
            .finish()
    }
}

impl StateMachine {
    pub const TYPE: &'static str = "StateMachine";

    pub fn new(base: StateBase) -> Self {
        Self {
            base,
            children: Vec::new(),
            transitions: BTreeMap::new(),
            default_initial_state: None,
            restart_on_execution: true,
            resume_state: Mutex::new(None),
            active_state: RwLock::new(None),
        }
    }

    /// Registers a child under its unique name together with its transitions.
    pub fn add_state(
        &mut self,
        mut child: Box<dyn State>,
        transitions: impl IntoIterator<Item = (Outcome, Transition)>,
    ) -> Result<(), StateMachineError> {
        let name = child.name().clone();
        if self.index_of(name.as_str()).is_some() {
            return Err(StateMachineError::DuplicateState {
                machine: self.base.nested_name().to_string(),
                name: name.to_string(),
            });
        }
        reparent(child.as_mut(), self.base.nested_name());
        debug!(machine = %self.base.nested_name(), state = %name, "Added state");
        self.transitions
            .insert(name, transitions.into_iter().collect());
        self.children.push(child);
        Ok(())
    }

    pub fn set_default_initial_state(&mut self, name: impl Into<StateName>) {
        self.default_initial_state = Some(name.into());
    }

    pub fn default_initial_state(&self) -> Option<&StateName> {
        self.default_initial_state.as_ref()
    }

    /// When false, a machine stopped by preemption resumes at the child that
    /// was active when it stopped.
    pub fn set_restart_on_execution(&mut self, restart: bool) {
        self.restart_on_execution = restart;
    }

    pub fn restart_on_execution(&self) -> bool {
        self.restart_on_execution
    }

    pub fn set_transition(
        &mut self,
        child: &str,
        outcome: Outcome,
        target: Transition,
    ) -> Result<(), StateMachineError> {
        let machine = self.base.nested_name().to_string();
        let map = self
            .transitions
            .get_mut(child)
            .ok_or_else(|| StateMachineError::UnknownState {
                machine,
                name: child.to_string(),
            })?;
        map.insert(outcome, target);
        Ok(())
    }

    pub fn remove_transition(&mut self, child: &str, outcome: &Outcome) -> Option<Transition> {
        self.transitions.get_mut(child)?.remove(outcome)
    }

    pub fn transitions_of(&self, child: &str) -> Option<&TransitionMap> {
        self.transitions.get(child)
    }

    pub fn state(&self, name: &str) -> Option<&(dyn State + 'static)> {
        self.children
            .iter()
            .find(|c| c.name().as_str() == name)
            .map(|c| c.as_ref())
    }

    pub fn state_mut(&mut self, name: &str) -> Option<&mut (dyn State + 'static)> {
        self.children
            .iter_mut()
            .find(|c| c.name().as_str() == name)
            .map(|c| c.as_mut())
    }

    /// Child `name` as its concrete type.
    pub fn state_as<T: State>(&self, name: &str) -> Option<&T> {
        self.state(name)?.downcast_ref::<T>()
    }

    pub fn state_as_mut<T: State>(&mut self, name: &str) -> Option<&mut T> {
        self.state_mut(name)?.downcast_mut::<T>()
    }

    pub fn children(&self) -> impl Iterator<Item = &(dyn State + 'static)> {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Name of the child currently executing, if any.
    pub fn active_state(&self) -> Option<StateName> {
        let active = *self
            .active_state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        active.map(|index| self.children[index].name().clone())
    }

    /// Child the next cycle would resume at, when restart is disabled.
    pub fn resume_state(&self) -> Option<StateName> {
        self.resume_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name().as_str() == name)
    }

    fn set_active(&self, index: Option<usize>) {
        *self
            .active_state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = index;
    }

    fn set_resume(&self, name: Option<StateName>) {
        *self
            .resume_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    fn start_index(&self) -> Option<usize> {
        let resume = if self.restart_on_execution {
            None
        } else {
            self.resume_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };
        resume
            .or_else(|| self.default_initial_state.clone())
            .and_then(|name| self.index_of(name.as_str()))
    }

    fn reachable_from_initial(&self) -> BTreeSet<usize> {
        let mut reached = BTreeSet::new();
        let Some(start) = self
            .default_initial_state
            .as_ref()
            .and_then(|name| self.index_of(name.as_str()))
        else {
            return reached;
        };
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            if !reached.insert(index) {
                continue;
            }
            let Some(map) = self.transitions.get(self.children[index].name()) else {
                continue;
            };
            for target in map.values() {
                if let Transition::To(next) = target {
                    if let Some(next_index) = self.index_of(next.as_str()) {
                        queue.push_back(next_index);
                    }
                }
            }
        }
        reached
    }

    fn exit_with(&self, outcome: Outcome, resume: Option<StateName>) -> Outcome {
        self.set_resume(resume);
        outcome
    }
}

fn reparent(state: &mut dyn State, parent: &NestedName) {
    state.base_mut().set_parent(parent);
    let nested = state.base().nested_name().clone();
    if let Some(machine) = state.as_state_machine_mut() {
        for child in machine.children.iter_mut() {
            reparent(child.as_mut(), &nested);
        }
    }
}

impl State for StateMachine {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn inconsistencies_impl(&self) -> Inconsistencies {
        let machine = self.base.nested_name();
        let mut inconsistencies = Inconsistencies::new();

        if self.children.is_empty() {
            inconsistencies.add(Inconsistency::new(format!(
                "The state machine '{machine}' does not contain any states."
            )));
        }

        match &self.default_initial_state {
            None => inconsistencies.add(Inconsistency::new(format!(
                "The initial state of '{machine}' has not been set."
            ))),
            Some(initial) if self.index_of(initial.as_str()).is_none() => {
                inconsistencies.add(Inconsistency::new(format!(
                    "The initial state '{initial}' of '{machine}' does not exist."
                )))
            }
            Some(_) => {}
        }

        let empty = TransitionMap::new();
        for child in &self.children {
            let child_name = child.nested_name();
            let map = self.transitions.get(child.name()).unwrap_or(&empty);

            for outcome in child.outcomes().iter() {
                if !map.contains_key(outcome) {
                    inconsistencies.add(Inconsistency::new(format!(
                        "The transition for outcome '{outcome}' of '{child_name}' is not set."
                    )));
                }
            }

            for (outcome, target) in map {
                if !child.outcomes().contains(outcome) {
                    inconsistencies.add(Inconsistency::new(format!(
                        "'{child_name}' has a transition for outcome '{outcome}' it does not declare."
                    )));
                }
                match target {
                    Transition::To(next) if self.index_of(next.as_str()).is_none() => {
                        inconsistencies.add(Inconsistency::new(format!(
                            "The outcome '{outcome}' of '{child_name}' leads to the unknown state '{next}'."
                        )));
                    }
                    Transition::Exit(exit) if !self.base.outcomes().contains(exit) => {
                        inconsistencies.add(Inconsistency::new(format!(
                            "The outcome '{outcome}' of '{child_name}' exits with '{exit}', which is not an outcome of '{machine}' {}.",
                            self.base.outcomes()
                        )));
                    }
                    _ => {}
                }
            }

            inconsistencies.extend(child.inconsistencies());
        }

        if self
            .default_initial_state
            .as_ref()
            .is_some_and(|initial| self.index_of(initial.as_str()).is_some())
        {
            let reached = self.reachable_from_initial();
            for (index, child) in self.children.iter().enumerate() {
                if !reached.contains(&index) {
                    inconsistencies.add(Inconsistency::new(format!(
                        "'{}' is not reachable from the initial state of '{machine}'.",
                        child.nested_name()
                    )));
                }
            }
        }

        inconsistencies
    }

    fn save_settings_impl(&self, settings: &mut Settings) {
        settings.add_parameter(Parameter::new(
            "restart_on_execution",
            self.restart_on_execution,
        ));
    }

    fn load_settings_impl(&mut self, settings: &Settings) -> bool {
        if settings.parameter_is_registered("restart_on_execution") {
            match settings.get::<bool>("restart_on_execution") {
                Ok(restart) => self.restart_on_execution = restart,
                Err(_) => return false,
            }
        }
        true
    }

    fn run_mid_execution(&self) -> Outcome {
        let Some(mut current) = self.start_index() else {
            self.base
                .report(ReportLevel::Error, "Cannot execute: the initial state is not set.");
            return outcomes::failure();
        };

        loop {
            let child = &self.children[current];
            if let Err(e) = mark_running(child.base()) {
                self.base.report(ReportLevel::Error, e.to_string());
                return self.exit_with(outcomes::failure(), None);
            }
            self.set_active(Some(current));
            if self.base.is_preemption_requested() {
                child.request_preemption();
            }

            let outcome = run_cycle(child.as_ref());
            self.set_active(None);

            let target = self
                .transitions
                .get(child.name())
                .and_then(|map| map.get(&outcome))
                .cloned();

            match target {
                Some(Transition::To(next)) => match self.index_of(next.as_str()) {
                    Some(next_index) => {
                        debug!(
                            machine = %self.base.nested_name(),
                            from = %child.name(),
                            outcome = %outcome,
                            to = %next,
                            "State machine transition"
                        );
                        current = next_index;
                    }
                    None => {
                        self.base.report(
                            ReportLevel::Error,
                            format!("The outcome '{outcome}' of '{}' leads to the unknown state '{next}'.", child.name()),
                        );
                        return self.exit_with(outcomes::failure(), None);
                    }
                },
                Some(Transition::Exit(exit)) => {
                    let resume = (exit == outcomes::preemption() && !self.restart_on_execution)
                        .then(|| child.name().clone());
                    info!(
                        machine = %self.base.nested_name(),
                        last_state = %child.name(),
                        outcome = %exit,
                        "State machine finished"
                    );
                    return self.exit_with(exit, resume);
                }
                None => {
                    self.base.report(
                        ReportLevel::Error,
                        format!("No transition is set for outcome '{outcome}' of '{}'.", child.name()),
                    );
                    return self.exit_with(outcomes::failure(), None);
                }
            }
        }
    }

    fn on_preemption_request(&self) {
        let active = *self
            .active_state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = active {
            self.children[index].request_preemption();
        }
    }

    fn progress_impl(&self) -> Progress {
        let active = *self
            .active_state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        active
            .map(|index| self.children[index].progress())
            .unwrap_or_default()
    }

    fn as_state_machine(&self) -> Option<&StateMachine> {
        Some(self)
    }

    fn as_state_machine_mut(&mut self) -> Option<&mut StateMachine> {
        Some(self)
    }
}

// Factory: creates states by type, binds the context and builds whole trees
// from mission descriptions.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::context::Context;
use crate::engine::description::{StateDescription, TransitionDescription};
use crate::engine::state::{State, StateBase, StateExt};
use crate::engine::state_machine::{StateMachine, StateMachineError, Transition};
use crate::engine::types::{Outcome, Outcomes, StateName, StateType};
use crate::states::{CalculateFibonacciSeries, CalculateTwoFibonacciSeriesSequentially};

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Unknown state type '{0}'")]
    UnknownType(String),
    #[error("Invalid state name '{0}'")]
    InvalidName(String),
    #[error("Construction of '{name}' ({state_type}) failed")]
    ConstructionFailed { name: String, state_type: String },
    #[error("State '{name}' rejected its settings")]
    SettingsRejected { name: String },
    #[error("State '{name}' of type '{state_type}' cannot contain children")]
    NotComposite { name: String, state_type: String },
    #[error(transparent)]
    DuplicateChild(#[from] StateMachineError),
}

/// A state type the factory can create by name.
pub trait StatePlugin: State + Sized {
    const TYPE: &'static str;

    /// Fresh instance around `base`. Heavy setup belongs in `construct_impl`.
    fn new(base: StateBase) -> Self;
}

impl StatePlugin for StateMachine {
    const TYPE: &'static str = StateMachine::TYPE;

    fn new(base: StateBase) -> Self {
        StateMachine::new(base)
    }
}

type Constructor = fn(StateBase) -> Box<dyn State>;

fn construct_boxed<T: StatePlugin>(base: StateBase) -> Box<dyn State> {
    Box::new(T::new(base))
}

/// Table of state types creatable at runtime.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    constructors: BTreeMap<StateType, Constructor>,
}

static BUILTIN_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let mut registry = Registry::new();
    registry.register::<StateMachine>();
    registry.register::<CalculateFibonacciSeries>();
    registry.register::<CalculateTwoFibonacciSeriesSequentially>();
    registry
});

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every state type shipped with the engine.
    pub fn builtin() -> &'static Registry {
        &BUILTIN_REGISTRY
    }

    pub fn register<T: StatePlugin>(&mut self) {
        self.constructors
            .insert(StateType::new(T::TYPE), construct_boxed::<T>);
    }

    pub fn contains(&self, state_type: &str) -> bool {
        self.constructors.contains_key(state_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &StateType> {
        self.constructors.keys()
    }

    fn constructor(&self, state_type: &str) -> Option<Constructor> {
        self.constructors.get(state_type).copied()
    }
}

/// Creates states bound to one context.
#[derive(Debug, Clone)]
pub struct Factory {
    context: Arc<Context>,
    registry: Registry,
}

impl Factory {
    pub fn new(context: Arc<Context>) -> Self {
        Self::with_registry(context, Registry::builtin().clone())
    }

    pub fn with_registry(context: Arc<Context>, registry: Registry) -> Self {
        Self { context, registry }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a state of a statically known type.
    pub fn create<T: StatePlugin>(&self, name: impl Into<StateName>) -> Result<Box<T>, FactoryError> {
        let base = self.base_for(name.into(), StateType::new(T::TYPE))?;
        let mut state = Box::new(T::new(base));
        self.finish_construction(state.as_mut())?;
        Ok(state)
    }

    /// Creates a state by its registered type name.
    pub fn create_state(
        &self,
        state_type: &str,
        name: impl Into<StateName>,
    ) -> Result<Box<dyn State>, FactoryError> {
        let constructor = self
            .registry
            .constructor(state_type)
            .ok_or_else(|| FactoryError::UnknownType(state_type.to_string()))?;
        let base = self.base_for(name.into(), StateType::new(state_type))?;
        let mut state = constructor(base);
        self.finish_construction(state.as_mut())?;
        Ok(state)
    }

    /// Builds the tree described by `description`.
    pub fn build(&self, description: &StateDescription) -> Result<Box<dyn State>, FactoryError> {
        let mut state = self.create_state(&description.state_type, description.name.as_str())?;

        if let Some(outcomes) = &description.outcomes {
            state
                .base_mut()
                .set_outcomes(Outcomes::new(outcomes.iter().cloned()));
        }

        if !state.load_settings(&description.settings) {
            return Err(FactoryError::SettingsRejected {
                name: description.name.clone(),
            });
        }

        if description.children.is_empty() && description.initial_state.is_none() {
            return Ok(state);
        }

        let state_type = state.state_type().to_string();
        let machine = state
            .as_state_machine_mut()
            .ok_or_else(|| FactoryError::NotComposite {
                name: description.name.clone(),
                state_type,
            })?;

        let siblings = description.children_names();
        for child in &description.children {
            let built = self.build(child)?;
            let transitions = child
                .transitions
                .iter()
                .map(|t| resolve_transition(t, &siblings));
            machine.add_state(built, transitions)?;
        }
        if let Some(initial) = &description.initial_state {
            machine.set_default_initial_state(initial.as_str());
        }

        debug!(state = %description.name, children = description.children.len(), "Built state machine");
        Ok(state)
    }

    fn base_for(&self, name: StateName, state_type: StateType) -> Result<StateBase, FactoryError> {
        if !name.is_valid() {
            return Err(FactoryError::InvalidName(name.to_string()));
        }
        Ok(StateBase::new(name, state_type, self.context.clone()))
    }

    fn finish_construction(&self, state: &mut dyn State) -> Result<(), FactoryError> {
        if !state.construct() {
            return Err(FactoryError::ConstructionFailed {
                name: state.name().to_string(),
                state_type: state.state_type().to_string(),
            });
        }
        info!(state = %state.name(), state_type = %state.state_type(), "State created");
        Ok(())
    }
}

fn resolve_transition(transition: &TransitionDescription, siblings: &[&str]) -> (Outcome, Transition) {
    let target = if siblings.contains(&transition.target.as_str()) {
        Transition::To(StateName::new(transition.target.as_str()))
    } else {
        Transition::Exit(Outcome::new(transition.target.as_str()))
    };
    (Outcome::new(transition.outcome.as_str()), target)
}

/// Description of `state`, suitable for `Factory::build`. Children are only
/// exported for the generic `StateMachine` type; other composites own theirs.
pub fn describe(state: &dyn State) -> StateDescription {
    let mut description = StateDescription::leaf(
        state.state_type().as_str(),
        state.name().as_str(),
        state.save_settings(),
    );

    if state.state_type().as_str() != StateMachine::TYPE {
        return description;
    }
    let Some(machine) = state.as_state_machine() else {
        return description;
    };

    description.outcomes = Some(state.outcomes().declared().cloned().collect());
    description.initial_state = machine.default_initial_state().map(|n| n.to_string());
    for child in machine.children() {
        let transitions = machine
            .transitions_of(child.name().as_str())
            .map(|map| {
                map.iter()
                    .map(|(outcome, target)| TransitionDescription {
                        outcome: outcome.to_string(),
                        target: target.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        description.add_child(describe(child), transitions);
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mocks::test_context;
    use crate::engine::types::outcomes;

    #[test]
    fn test_builtin_registry_types() {
        let types: Vec<&str> = Registry::builtin().types().map(StateType::as_str).collect();
        assert!(types.contains(&"StateMachine"));
        assert!(types.contains(&"CalculateFibonacciSeries"));
        assert!(types.contains(&"CalculateTwoFibonacciSeriesSequentially"));
    }

    #[test]
    fn test_create_state_binds_name_type_and_context() {
        let (context, _report) = test_context();
        let factory = Factory::new(context.clone());
        let state = factory.create_state("StateMachine", "Mission").unwrap();

        assert_eq!(state.name().as_str(), "Mission");
        assert_eq!(state.state_type().as_str(), "StateMachine");
        assert!(Arc::ptr_eq(state.context(), &context));
        assert!(state.as_state_machine().is_some());
    }

    #[test]
    fn test_unknown_type_and_invalid_name() {
        let (context, _report) = test_context();
        let factory = Factory::new(context);

        assert!(matches!(
            factory.create_state("Teleport", "Jump"),
            Err(FactoryError::UnknownType(t)) if t == "Teleport"
        ));
        assert!(matches!(
            factory.create_state("StateMachine", "a/b"),
            Err(FactoryError::InvalidName(_))
        ));
        assert!(matches!(
            factory.create::<StateMachine>(""),
            Err(FactoryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_build_rejects_children_for_leaf_types() {
        let (context, _report) = test_context();
        let factory = Factory::new(context);
        let mut description = StateDescription::leaf("CalculateFibonacciSeries", "Leaf", Default::default());
        description.add_child(
            StateDescription::leaf("CalculateFibonacciSeries", "Inner", Default::default()),
            Vec::new(),
        );

        assert!(matches!(
            factory.build(&description),
            Err(FactoryError::NotComposite { .. })
        ));
    }

    #[test]
    fn test_build_resolves_siblings_and_exits() {
        let (context, _report) = test_context();
        let factory = Factory::new(context);
        let mission = StateDescription::from_toml_str(
            r#"
type = "StateMachine"
name = "Mission"
outcomes = ["success"]
initial_state = "First"

[[settings.parameters]]
name = "restart_on_execution"
type = "bool"
value = true

[[children]]
type = "CalculateFibonacciSeries"
name = "First"
transitions = [
    { outcome = "success", target = "Second" },
    { outcome = "preemption", target = "preemption" },
    { outcome = "failure", target = "failure" },
]
[[children.settings.parameters]]
name = "order"
type = "int"
value = 3

[[children]]
type = "CalculateFibonacciSeries"
name = "Second"
transitions = [
    { outcome = "success", target = "success" },
    { outcome = "preemption", target = "preemption" },
    { outcome = "failure", target = "failure" },
]
[[children.settings.parameters]]
name = "order"
type = "int"
value = 4
"#,
        )
        .unwrap();

        let state = factory.build(&mission).unwrap();
        assert!(state.inconsistencies().is_empty(), "{}", state.inconsistencies());

        let machine = state.as_state_machine().unwrap();
        let first = machine.transitions_of("First").unwrap();
        assert_eq!(
            first.get(&outcomes::success()),
            Some(&Transition::To(StateName::new("Second")))
        );
        let second = machine.transitions_of("Second").unwrap();
        assert_eq!(
            second.get(&outcomes::success()),
            Some(&Transition::Exit(outcomes::success()))
        );
        assert_eq!(
            machine.state("Second").unwrap().nested_name().to_string(),
            "Mission/Second"
        );

        let described = describe(state.as_ref());
        assert_eq!(described.children_names(), vec!["First", "Second"]);
        assert_eq!(described.settings, mission.settings);
        assert_eq!(described.children[1].settings, mission.children[1].settings);
        let rebuilt = factory.build(&described).unwrap();
        assert_eq!(describe(rebuilt.as_ref()), described);
    }

    #[test]
    fn test_duplicate_child_in_description() {
        let (context, _report) = test_context();
        let factory = Factory::new(context);
        let mut description = StateDescription::leaf("StateMachine", "Mission", Default::default());
        for _ in 0..2 {
            description.add_child(
                StateDescription::leaf("StateMachine", "Twin", Default::default()),
                Vec::new(),
            );
        }

        assert!(matches!(
            factory.build(&description),
            Err(FactoryError::DuplicateChild(StateMachineError::DuplicateState { .. }))
        ));
    }
}

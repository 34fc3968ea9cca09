// Execution engine - hierarchical state machines
//
// States are built through the factory, checked for consistency and executed
// either in place or on a dedicated thread by the executor.

pub mod types;
pub mod settings;
pub mod report;
pub mod context;
pub mod state;
pub mod state_machine;
pub mod factory;
pub mod description;
pub mod lifecycle;
pub mod executor;

#[cfg(test)]
pub mod mocks;


pub use context::{Clock, Context, ContextBuilder, MapParameterSource, ParameterSource, SystemClock};
pub use description::{StateDescription, TransitionDescription};
pub use executor::Executor;
pub use factory::{describe, Factory, FactoryError, Registry, StatePlugin};
pub use lifecycle::Phase;
pub use report::{Report, ReportEntry, ReportLevel, ReportSink};
pub use settings::{Parameter, ParameterValue, Settings, SettingsError};
pub use state::{ExecutionError, State, StateBase, StateExt};
pub use state_machine::{StateMachine, StateMachineError, Transition, TransitionMap};
pub use types::{outcomes, Inconsistencies, Inconsistency, NestedName, Outcome, Outcomes, Progress, StateName, StateType};

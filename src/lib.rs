// Mission Engine Library - Hierarchical state machine execution
// This exposes the engine, the action layer and the builtin states

pub mod action;
pub mod config;
pub mod engine;
pub mod observability;
pub mod states;
pub mod telemetry;

// Re-export key types for easy access
pub use action::{ActionBus, ActionClient, ActionOutcome, FibonacciAction, FibonacciServer};
pub use config::{config, init_config, EngineConfig};
pub use engine::{
    describe, outcomes, Context, ExecutionError, Executor, Factory, FactoryError, Outcome, Phase,
    Progress, Registry, Report, ReportLevel, Settings, State, StateDescription, StateExt,
    StateMachine, StatePlugin,
};
pub use observability::{execution_metrics, ExecutionMetrics, ExecutionTimer};
pub use states::{CalculateFibonacciSeries, CalculateTwoFibonacciSeriesSequentially};
pub use telemetry::{create_execution_span, generate_execution_id, init_telemetry};

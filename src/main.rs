use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mission_engine::action::{ActionBus, FibonacciAction, FibonacciServer};
use mission_engine::config::{config, EngineConfig};
use mission_engine::engine::{
    describe, Context, Executor, Factory, Parameter, Registry, Report, Settings, State,
    StateDescription, StateExt,
};
use mission_engine::observability::execution_metrics;
use mission_engine::telemetry::init_telemetry;

const FIBONACCI_ACTION_PARAMETER: &str = "/state_machine_example/calculate_fibonacci_series/action";
const DEFAULT_FIBONACCI_ACTION: &str = "/fibonacci";
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "mission-engine")]
#[command(about = "Build, check and execute hierarchical state machine missions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the state types that can be created by name
    Types,
    /// Build a mission file and report its inconsistencies
    Check {
        /// Mission description (TOML)
        mission: PathBuf,
    },
    /// Print a mission description for a freshly created state
    Template {
        /// State type to describe
        #[arg(long = "type")]
        state_type: String,
        /// Name of the state
        #[arg(long, default_value = "Mission")]
        name: String,
    },
    /// Execute a mission file or a single state
    Run {
        /// Mission description (TOML)
        #[arg(long, conflicts_with = "state_type")]
        mission: Option<PathBuf>,
        /// State type to create instead of loading a mission
        #[arg(long = "type")]
        state_type: Option<String>,
        /// Name of the created state
        #[arg(long, default_value = "Mission")]
        name: String,
        /// Order applied to the root; refused when the root has no order parameter
        #[arg(long)]
        order: Option<i32>,
        /// Request preemption after this many milliseconds
        #[arg(long)]
        preempt_after_ms: Option<u64>,
        /// Print the execution report as JSON
        #[arg(long)]
        report_json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let defaults = EngineConfig::default();
    let (engine_config, config_error) = match config() {
        Ok(loaded) => (loaded, None),
        Err(e) => (&defaults, Some(e)),
    };
    init_telemetry(&engine_config.observability)?;
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Falling back to default configuration");
    }

    match cli.command {
        Commands::Types => types_command(),
        Commands::Check { mission } => check_command(engine_config, mission),
        Commands::Template { state_type, name } => template_command(engine_config, &state_type, &name),
        Commands::Run {
            mission,
            state_type,
            name,
            order,
            preempt_after_ms,
            report_json,
        } => run_command(
            engine_config,
            mission,
            state_type,
            &name,
            order,
            preempt_after_ms,
            report_json,
        ),
    }
}

fn build_context(engine_config: &EngineConfig, report: Arc<Report>) -> Arc<Context> {
    let parameters = engine_config.parameter_source();
    let actions = Arc::new(ActionBus::new());

    let step_delay = Duration::from_millis(engine_config.actions.fibonacci_step_delay_ms);
    let server = Arc::new(FibonacciServer::new(step_delay));
    actions.register::<FibonacciAction>(DEFAULT_FIBONACCI_ACTION, server.clone());
    if let Some(configured) = engine_config
        .parameters
        .get(FIBONACCI_ACTION_PARAMETER)
        .map(ToString::to_string)
    {
        if configured != DEFAULT_FIBONACCI_ACTION {
            actions.register::<FibonacciAction>(&configured, server);
        }
    }

    Arc::new(
        Context::builder()
            .report_sink(report)
            .parameters(Arc::new(parameters))
            .actions(actions)
            .build(),
    )
}

fn types_command() -> Result<()> {
    for state_type in Registry::builtin().types() {
        println!("{state_type}");
    }
    Ok(())
}

fn load_mission(factory: &Factory, path: &Path) -> Result<Box<dyn State>> {
    let description = StateDescription::load_from_file(path)
        .with_context(|| format!("Failed to read mission {}", path.display()))?;
    let root = factory
        .build(&description)
        .with_context(|| format!("Failed to build mission {}", path.display()))?;
    Ok(root)
}

fn check_command(engine_config: &EngineConfig, mission: PathBuf) -> Result<()> {
    let factory = Factory::new(build_context(engine_config, Arc::new(Report::new())));
    let root = load_mission(&factory, &mission)?;

    let inconsistencies = root.inconsistencies();
    if inconsistencies.is_empty() {
        println!("✅ Mission '{}' is consistent", root.name());
        return Ok(());
    }

    println!("❌ Mission '{}' is inconsistent:", root.name());
    print!("{inconsistencies}");
    bail!("{} inconsistencies found", inconsistencies.len())
}

fn template_command(engine_config: &EngineConfig, state_type: &str, name: &str) -> Result<()> {
    let factory = Factory::new(build_context(engine_config, Arc::new(Report::new())));
    let state = factory.create_state(state_type, name)?;
    print!("{}", describe(state.as_ref()).to_toml_string()?);
    Ok(())
}

fn run_command(
    engine_config: &EngineConfig,
    mission: Option<PathBuf>,
    state_type: Option<String>,
    name: &str,
    order: Option<i32>,
    preempt_after_ms: Option<u64>,
    report_json: bool,
) -> Result<()> {
    let report = Arc::new(Report::new());
    let factory = Factory::new(build_context(engine_config, report.clone()));

    let mut root = match (mission, state_type) {
        (Some(path), _) => load_mission(&factory, &path)?,
        (None, Some(state_type)) => factory.create_state(&state_type, name)?,
        (None, None) => return Err(anyhow!("Either --mission or --type is required")),
    };
    if let Some(order) = order {
        let mut settings = Settings::new();
        settings.add_parameter(Parameter::new("order", order));
        if !root.load_settings(&settings) {
            bail!("'{}' rejected order {}", root.name(), order);
        }
        if !root.save_settings().parameter_is_registered("order") {
            bail!("'{}' has no 'order' parameter, --order cannot be applied", root.name());
        }
    }

    let executor = Executor::new(root);
    executor.start()?;
    println!("🚀 Executing '{}' ...", executor.root().name());

    let deadline = preempt_after_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut preempted = false;
    while executor.is_running() {
        if let Some(deadline) = deadline {
            if !preempted && Instant::now() >= deadline {
                println!("⏸️  Requesting preemption");
                executor.request_preemption();
                preempted = true;
            }
        }
        if let Some(ratio) = executor.progress().ratio() {
            tracing::debug!(progress = ratio, "Execution progress");
        }
        std::thread::sleep(PROGRESS_POLL_INTERVAL);
    }

    let outcome = executor.wait()?;
    println!("🏁 '{}' finished with outcome '{}'", executor.root().name(), outcome);
    execution_metrics().log_stats();

    if report_json {
        println!("{}", serde_json::to_string_pretty(&report.entries())?);
    }
    Ok(())
}

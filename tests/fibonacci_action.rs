// Action layer and Fibonacci state behavior through the public API

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use mission_engine::action::{
    Action, ActionBus, ActionClient, ActionError, ActionOutcome, ActionServer, FeedbackPublisher,
    FibonacciAction, FibonacciGoal, FibonacciServer,
};
use mission_engine::engine::{
    outcomes, Context, Executor, Factory, MapParameterSource, ParameterValue, Report,
    ReportLevel, StateExt,
};
use mission_engine::CalculateFibonacciSeries;

const ACTION_PARAMETER: &str = "/state_machine_example/calculate_fibonacci_series/action";

fn fibonacci_bus(name: &str, step_delay: Duration) -> Arc<ActionBus> {
    let actions = Arc::new(ActionBus::new());
    actions.register::<FibonacciAction>(name, Arc::new(FibonacciServer::new(step_delay)));
    actions
}

fn context_with(actions: Arc<ActionBus>) -> (Arc<Context>, Arc<Report>) {
    let report = Arc::new(Report::new());
    let context = Context::builder()
        .report_sink(report.clone())
        .actions(actions)
        .build();
    (Arc::new(context), report)
}

/// Counts down to zero, one feedback per step.
struct CountdownAction;

impl Action for CountdownAction {
    type Goal = u32;
    type Feedback = u32;
    type Result = String;

    const NAME: &'static str = "countdown";
}

struct CountdownServer;

#[async_trait]
impl ActionServer<CountdownAction> for CountdownServer {
    async fn execute(
        &self,
        goal: u32,
        feedback: FeedbackPublisher<u32>,
        cancel: watch::Receiver<bool>,
    ) -> Result<String, ActionError> {
        for remaining in (0..goal).rev() {
            if *cancel.borrow() {
                return Err(ActionError::Cancelled);
            }
            feedback.publish(remaining);
        }
        Ok("liftoff".to_string())
    }
}

#[test]
fn test_bus_keeps_servers_of_different_actions_apart() {
    let actions = fibonacci_bus("/fibonacci", Duration::ZERO);
    actions.register::<CountdownAction>("/countdown", Arc::new(CountdownServer));

    assert!(actions.is_available("/countdown"));
    assert!(actions.server::<CountdownAction>("/fibonacci").is_none());
    assert!(actions.server::<FibonacciAction>("/fibonacci").is_some());

    let client = ActionClient::<CountdownAction>::new(actions.clone(), "/countdown");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.set_feedback_cb(move |remaining| sink.lock().unwrap().push(remaining));

    assert_eq!(client.execute(3), ActionOutcome::Succeeded);
    assert_eq!(client.result().as_deref(), Some("liftoff"));
    assert_eq!(*seen.lock().unwrap(), vec![2, 1, 0]);

    assert!(actions.unregister("/countdown"));
    assert_eq!(client.execute(3), ActionOutcome::ServerUnavailable);
}

#[test]
fn test_client_waits_for_late_server() {
    let actions = Arc::new(ActionBus::new());
    let client = ActionClient::<FibonacciAction>::new(actions.clone(), "/fibonacci")
        .with_server_timeout(Duration::from_secs(5));

    let registrar = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        actions.register::<FibonacciAction>("/fibonacci", Arc::new(FibonacciServer::new(Duration::ZERO)));
    });

    assert!(client.execute(FibonacciGoal { order: 6 }).succeeded());
    assert_eq!(client.result().unwrap().sequence.last(), Some(&8));
    registrar.join().unwrap();
}

#[test]
fn test_state_uses_configured_action_name() {
    let actions = fibonacci_bus("/other_fibonacci", Duration::ZERO);
    let report = Arc::new(Report::new());
    let parameters = MapParameterSource::default().with(
        ACTION_PARAMETER,
        ParameterValue::String("/other_fibonacci".to_string()),
    );
    let context = Arc::new(
        Context::builder()
            .report_sink(report.clone())
            .parameters(Arc::new(parameters))
            .actions(actions)
            .build(),
    );

    let mut state = Factory::new(context)
        .create::<CalculateFibonacciSeries>("Fib")
        .unwrap();
    state.set_order(12);

    assert_eq!(state.execute().unwrap(), outcomes::success());
    let info = report.entries_at(ReportLevel::Info);
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].value, Some(144.0));
}

#[test]
fn test_progress_grows_while_executing() {
    let (context, _report) = context_with(fibonacci_bus("/fibonacci", Duration::from_millis(10)));
    let mut state = Factory::new(context)
        .create::<CalculateFibonacciSeries>("Fib")
        .unwrap();
    state.set_order(20);

    let executor = Executor::new(state);
    executor.start().unwrap();

    let mut last_done = 0.0;
    let started = Instant::now();
    while executor.is_running() && started.elapsed() < Duration::from_secs(10) {
        if let Some(done) = executor.progress().done {
            assert!(done >= last_done);
            last_done = done;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(executor.wait().unwrap(), outcomes::success());
    let progress = executor.progress();
    assert_eq!(progress.goal, Some(20.0));
    assert_eq!(progress.ratio(), Some(1.0));
}

#[test]
fn test_preemption_cancels_the_running_goal() {
    let (context, report) = context_with(fibonacci_bus("/fibonacci", Duration::from_millis(50)));
    let mut state = Factory::new(context)
        .create::<CalculateFibonacciSeries>("Fib")
        .unwrap();
    state.set_order(80);

    let executor = Executor::new(state);
    executor.start().unwrap();
    let started = Instant::now();
    while !executor.progress().is_set() && started.elapsed() < Duration::from_secs(10) {
        std::thread::sleep(Duration::from_millis(5));
    }

    executor.request_preemption();
    assert_eq!(executor.wait().unwrap(), outcomes::preemption());
    assert!(started.elapsed() < Duration::from_secs(3));

    let debug = report.entries_at(ReportLevel::Debug);
    assert!(debug.iter().any(|entry| entry.message.contains("was cancelled")));
    assert!(report.entries_at(ReportLevel::Info).is_empty());

    let fib = executor.into_root().unwrap();
    assert!(fib.downcast_ref::<CalculateFibonacciSeries>().is_some());
}

#[test]
fn test_overflowing_order_fails() {
    let (context, report) = context_with(fibonacci_bus("/fibonacci", Duration::ZERO));
    let mut state = Factory::new(context)
        .create::<CalculateFibonacciSeries>("Fib")
        .unwrap();
    state.set_order(200);

    assert_eq!(state.execute().unwrap(), outcomes::failure());
    let errors = report.entries_at(ReportLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("overflow"));
}

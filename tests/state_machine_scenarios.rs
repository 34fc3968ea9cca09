// State machine scenarios driven through the public API
// Uses the builtin Fibonacci states against an in-process action server

use std::sync::Arc;
use std::time::{Duration, Instant};

use mission_engine::action::{ActionBus, FibonacciAction, FibonacciServer};
use mission_engine::engine::{
    outcomes, Context, Executor, Factory, Parameter, Phase, Report, ReportLevel, Settings, State,
    StateDescription, StateExt, StateName, TransitionDescription,
};
use mission_engine::{CalculateFibonacciSeries, CalculateTwoFibonacciSeriesSequentially};

fn context(step_delay: Duration) -> (Arc<Context>, Arc<Report>) {
    let report = Arc::new(Report::new());
    let actions = Arc::new(ActionBus::new());
    actions.register::<FibonacciAction>("/fibonacci", Arc::new(FibonacciServer::new(step_delay)));
    let context = Context::builder()
        .report_sink(report.clone())
        .actions(actions)
        .build();
    (Arc::new(context), report)
}

fn order_settings(order: i32) -> Settings {
    let mut settings = Settings::new();
    settings.add_parameter(Parameter::new("order", order));
    settings
}

fn info_entries_of(report: &Report, state: &str) -> usize {
    report
        .entries_at(ReportLevel::Info)
        .iter()
        .filter(|entry| entry.state == state)
        .count()
}

fn wait_for_active(executor: &Executor, name: &str) {
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(10) {
        let machine = executor.root().as_state_machine().unwrap();
        if machine.active_state() == Some(StateName::new(name)) && executor.progress().is_set() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("{name} never became active");
}

/// Generic machine: First (fast) -> Second (slow) -> exit with success
fn two_step_mission(first_order: i32, second_order: i32, restart: bool) -> StateDescription {
    let mut mission = StateDescription::leaf("StateMachine", "Mission", {
        let mut settings = Settings::new();
        settings.add_parameter(Parameter::new("restart_on_execution", restart));
        settings
    });
    mission.outcomes = Some(vec![outcomes::success()]);
    mission.initial_state = Some("First".to_string());
    mission.add_child(
        StateDescription::leaf("CalculateFibonacciSeries", "First", order_settings(first_order)),
        vec![
            TransitionDescription::new("success", "Second"),
            TransitionDescription::new("preemption", "preemption"),
            TransitionDescription::new("failure", "failure"),
        ],
    );
    mission.add_child(
        StateDescription::leaf("CalculateFibonacciSeries", "Second", order_settings(second_order)),
        vec![
            TransitionDescription::new("success", "success"),
            TransitionDescription::new("preemption", "preemption"),
            TransitionDescription::new("failure", "failure"),
        ],
    );
    mission
}

#[test]
fn test_two_series_run_in_sequence() {
    let (context, report) = context(Duration::ZERO);
    let mut state = Factory::new(context)
        .create::<CalculateTwoFibonacciSeriesSequentially>("Both")
        .unwrap();
    state.set_order(7);
    assert!(state.inconsistencies().is_empty());

    assert_eq!(state.execute().unwrap(), outcomes::success());

    let info = report.entries_at(ReportLevel::Info);
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].state, "Both/CalculateFibonacciSeries1");
    assert_eq!(info[1].state, "Both/CalculateFibonacciSeries2");
    assert!(info.iter().all(|entry| entry.value == Some(13.0)));
    assert!(report.entries_at(ReportLevel::Error).is_empty());
}

#[test]
fn test_missing_order_is_reported_for_both_children() {
    let (context, _report) = context(Duration::ZERO);
    let state = Factory::new(context)
        .create::<CalculateTwoFibonacciSeriesSequentially>("Both")
        .unwrap();

    let inconsistencies = state.inconsistencies();
    assert_eq!(inconsistencies.count_matching("has not been set."), 2);
    assert!(state.execute().is_err());
}

#[test]
fn test_preempting_first_series_skips_second() {
    let (context, report) = context(Duration::from_millis(20));
    let mut state = Factory::new(context)
        .create::<CalculateTwoFibonacciSeriesSequentially>("Both")
        .unwrap();
    state.set_order(40);

    let executor = Executor::new(state);
    executor.start().unwrap();
    wait_for_active(&executor, CalculateTwoFibonacciSeriesSequentially::FIRST);

    executor.request_preemption();
    assert_eq!(executor.wait().unwrap(), outcomes::preemption());
    assert_eq!(executor.phase(), Phase::Finished);

    let second = report
        .entries()
        .iter()
        .filter(|entry| entry.state.ends_with(CalculateTwoFibonacciSeriesSequentially::SECOND))
        .count();
    assert_eq!(second, 0);
    assert!(report.entries_at(ReportLevel::Error).is_empty());
}

#[test]
fn test_missing_server_fails_the_sequence() {
    let report = Arc::new(Report::new());
    let context = Arc::new(Context::builder().report_sink(report.clone()).build());
    let mut state = Factory::new(context)
        .create::<CalculateTwoFibonacciSeriesSequentially>("Both")
        .unwrap();
    state.set_order(3);

    assert_eq!(state.execute().unwrap(), outcomes::failure());
    let errors = report.entries_at(ReportLevel::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].state, "Both/CalculateFibonacciSeries1");
}

#[test]
fn test_built_mission_resumes_preempted_child() {
    let (context, report) = context(Duration::from_millis(20));
    let root = Factory::new(context)
        .build(&two_step_mission(3, 15, false))
        .unwrap();
    assert!(root.inconsistencies().is_empty());

    let executor = Executor::new(root);
    executor.start().unwrap();
    wait_for_active(&executor, "Second");
    executor.request_preemption();
    assert_eq!(executor.wait().unwrap(), outcomes::preemption());

    let machine = executor.root().as_state_machine().unwrap();
    assert_eq!(machine.resume_state(), Some(StateName::new("Second")));

    assert_eq!(executor.run().unwrap(), outcomes::success());
    assert_eq!(executor.runs(), 2);
    assert_eq!(info_entries_of(&report, "Mission/First"), 1);
    assert_eq!(info_entries_of(&report, "Mission/Second"), 1);
    assert!(executor.root().as_state_machine().unwrap().resume_state().is_none());
}

#[test]
fn test_built_mission_restarts_from_initial_state() {
    let (context, report) = context(Duration::from_millis(20));
    let root = Factory::new(context)
        .build(&two_step_mission(3, 15, true))
        .unwrap();

    let executor = Executor::new(root);
    executor.start().unwrap();
    wait_for_active(&executor, "Second");
    executor.request_preemption();
    assert_eq!(executor.wait().unwrap(), outcomes::preemption());

    assert_eq!(executor.run().unwrap(), outcomes::success());
    assert_eq!(info_entries_of(&report, "Mission/First"), 2);
    assert_eq!(info_entries_of(&report, "Mission/Second"), 1);
}

#[test]
fn test_children_are_reachable_by_name() {
    let (context, _report) = context(Duration::ZERO);
    let root = Factory::new(context)
        .build(&two_step_mission(4, 6, true))
        .unwrap();
    let machine = root.as_state_machine().unwrap();

    let second = machine.state_as::<CalculateFibonacciSeries>("Second").unwrap();
    assert_eq!(second.order(), Some(6));
    assert_eq!(second.nested_name().to_string(), "Mission/Second");
    assert!(machine.state("Third").is_none());

    let child = machine.state("First").unwrap();
    assert!(child.is::<CalculateFibonacciSeries>());
}

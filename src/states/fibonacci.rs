// Leaf state computing one Fibonacci series through the `/fibonacci` action

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::action::{ActionClient, ActionOutcome, FibonacciAction, FibonacciFeedback, FibonacciGoal};
use crate::engine::context::get_param;
use crate::engine::factory::StatePlugin;
use crate::engine::report::ReportLevel;
use crate::engine::settings::{Parameter, Settings};
use crate::engine::state::{State, StateBase};
use crate::engine::types::{outcomes, Inconsistencies, Inconsistency, Outcome, Outcomes, Progress};

const ACTION_PARAMETER: &str = "/state_machine_example/calculate_fibonacci_series/action";
const SERVER_TIMEOUT_PARAMETER: &str =
    "/state_machine_example/calculate_fibonacci_series/server_wait_timeout_ms";
const DEFAULT_ACTION: &str = "/fibonacci";
const DEFAULT_SERVER_TIMEOUT_MS: u64 = 1000;

type FibonacciClient = ActionClient<FibonacciAction>;

pub struct CalculateFibonacciSeries {
    base: StateBase,
    order: Option<i32>,
    action: String,
    server_timeout: Duration,
    client: RwLock<Option<Arc<FibonacciClient>>>,
    feedback: Arc<RwLock<Option<FibonacciFeedback>>>,
}

impl CalculateFibonacciSeries {
    pub fn set_order(&mut self, order: i32) {
        self.order = Some(order);
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    /// Name of the action server goals are sent to.
    pub fn action(&self) -> &str {
        &self.action
    }

    fn current_client(&self) -> Option<Arc<FibonacciClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How long a goal waits for its action server to appear.
    pub fn server_timeout(&self) -> Duration {
        self.server_timeout
    }
}

impl StatePlugin for CalculateFibonacciSeries {
    const TYPE: &'static str = "CalculateFibonacciSeries";

    fn new(base: StateBase) -> Self {
        Self {
            base,
            order: None,
            action: DEFAULT_ACTION.to_string(),
            server_timeout: Duration::from_millis(DEFAULT_SERVER_TIMEOUT_MS),
            client: RwLock::new(None),
            feedback: Arc::new(RwLock::new(None)),
        }
    }
}

impl State for CalculateFibonacciSeries {
    fn base(&self) -> &StateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut StateBase {
        &mut self.base
    }

    fn construct_impl(&mut self) -> bool {
        self.base
            .set_outcomes(Outcomes::new([outcomes::success()]));
        self.base.set_nominal_outcome(outcomes::success());
        let context = self.base.context().clone();
        get_param(context.parameters(), ACTION_PARAMETER, &mut self.action);

        let mut timeout_ms = DEFAULT_SERVER_TIMEOUT_MS as i64;
        if get_param(context.parameters(), SERVER_TIMEOUT_PARAMETER, &mut timeout_ms) {
            match u64::try_from(timeout_ms) {
                Ok(millis) => self.server_timeout = Duration::from_millis(millis),
                Err(_) => {
                    debug!(state = %self.base.nested_name(), timeout_ms, "Negative server timeout, keeping default");
                }
            }
        }
        true
    }

    fn inconsistencies_impl(&self) -> Inconsistencies {
        let mut inconsistencies = Inconsistencies::new();
        if self.order.is_none() {
            inconsistencies.add(Inconsistency::new(format!(
                "The order of '{}' has not been set.",
                self.base.nested_name()
            )));
        }
        inconsistencies
    }

    fn save_settings_impl(&self, settings: &mut Settings) {
        // Always present so editors show the field.
        settings.add_parameter(Parameter::new("order", self.order.unwrap_or(0)));
    }

    fn load_settings_impl(&mut self, settings: &Settings) -> bool {
        if settings.parameter_is_registered("order") {
            match settings.get::<i32>("order") {
                Ok(order) => self.order = Some(order),
                Err(e) => {
                    debug!(state = %self.base.nested_name(), error = %e, "Invalid order parameter");
                    return false;
                }
            }
        }
        true
    }

    fn run_pre_execution(&self) {
        *self.feedback.write().unwrap_or_else(PoisonError::into_inner) = None;

        let client = FibonacciClient::new(self.base.context().actions().clone(), self.action.clone())
            .with_server_timeout(self.server_timeout);
        let feedback = self.feedback.clone();
        client.set_feedback_cb(move |update| {
            *feedback.write().unwrap_or_else(PoisonError::into_inner) = Some(update);
        });
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(client));
    }

    fn run_mid_execution(&self) -> Outcome {
        let Some(order) = self.order else {
            self.base.report(
                ReportLevel::Error,
                "Failed to calculate Fibonacci series: The order has not been set.",
            );
            return outcomes::failure();
        };

        if self.base.is_preemption_requested() {
            self.base.report(
                ReportLevel::Debug,
                format!("Calculating Fibonacci series of order '{order}' was preempted before it started."),
            );
            return outcomes::preemption();
        }

        let Some(client) = self.current_client() else {
            self.base.report(
                ReportLevel::Error,
                "Failed to calculate Fibonacci series: The action client is not available.",
            );
            return outcomes::failure();
        };

        self.base.report(
            ReportLevel::Debug,
            format!("Calculating Fibonacci series of order '{order}' ..."),
        );

        let outcome = client.execute(FibonacciGoal { order });
        match &outcome {
            ActionOutcome::Succeeded => {
                let last = client
                    .result()
                    .and_then(|result| result.sequence.last().copied())
                    .unwrap_or(0);
                let context = self.base.context();
                let entry = context
                    .create_entry(
                        self.base.nested_name(),
                        ReportLevel::Info,
                        format!("Successfully calculated Fibonacci series of order '{order}'."),
                    )
                    .with_value(last as f64, "");
                context.add_entry(entry);
                outcomes::success()
            }
            ActionOutcome::Cancelled => {
                self.base.report(
                    ReportLevel::Debug,
                    format!("Calculating Fibonacci series of order '{order}' was cancelled: {outcome}"),
                );
                outcomes::preemption()
            }
            other => {
                self.base.report(
                    ReportLevel::Error,
                    format!("Failed to calculate Fibonacci series of order '{order}': {other}"),
                );
                outcomes::failure()
            }
        }
    }

    fn run_post_execution(&self) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn on_preemption_request(&self) {
        if let Some(client) = self.current_client() {
            client.cancel_execution();
        }
    }

    fn progress_impl(&self) -> Progress {
        let feedback = self.feedback.read().unwrap_or_else(PoisonError::into_inner);
        match (self.order, feedback.as_ref()) {
            (Some(order), Some(feedback)) => {
                Progress::new(f64::from(order), feedback.sequence.len() as f64, "")
            }
            _ => Progress::default(),
        }
    }
}

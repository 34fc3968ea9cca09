// Composite state running two Fibonacci calculations one after the other

use tracing::warn;

use crate::engine::factory::{Factory, StatePlugin};
use crate::engine::settings::{Parameter, Settings};
use crate::engine::state::{State, StateBase};
use crate::engine::state_machine::{StateMachine, Transition};
use crate::engine::types::{outcomes, Inconsistencies, Outcome, Outcomes, Progress, StateName};
use crate::states::fibonacci::CalculateFibonacciSeries;

pub struct CalculateTwoFibonacciSeriesSequentially {
    machine: StateMachine,
}

impl CalculateTwoFibonacciSeriesSequentially {
    pub const FIRST: &'static str = "CalculateFibonacciSeries1";
    pub const SECOND: &'static str = "CalculateFibonacciSeries2";

    /// Sets the order of both series.
    pub fn set_order(&mut self, order: i32) {
        for name in [Self::FIRST, Self::SECOND] {
            if let Some(child) = self.machine.state_as_mut::<CalculateFibonacciSeries>(name) {
                child.set_order(order);
            }
        }
    }

    /// Order of the first series; both are kept equal.
    pub fn order(&self) -> Option<i32> {
        self.machine
            .state_as::<CalculateFibonacciSeries>(Self::FIRST)?
            .order()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn add_children(&mut self) -> Result<(), String> {
        let factory = Factory::new(self.machine.base().context().clone());
        let first = factory
            .create::<CalculateFibonacciSeries>(Self::FIRST)
            .map_err(|e| e.to_string())?;
        let second = factory
            .create::<CalculateFibonacciSeries>(Self::SECOND)
            .map_err(|e| e.to_string())?;

        self.machine
            .add_state(
                first,
                [
                    (outcomes::success(), Transition::To(StateName::new(Self::SECOND))),
                    (outcomes::preemption(), Transition::Exit(outcomes::preemption())),
                    (outcomes::failure(), Transition::Exit(outcomes::failure())),
                ],
            )
            .map_err(|e| e.to_string())?;
        self.machine
            .add_state(
                second,
                [
                    (outcomes::success(), Transition::Exit(outcomes::success())),
                    (outcomes::preemption(), Transition::Exit(outcomes::preemption())),
                    (outcomes::failure(), Transition::Exit(outcomes::failure())),
                ],
            )
            .map_err(|e| e.to_string())?;
        self.machine.set_default_initial_state(Self::FIRST);
        Ok(())
    }
}

impl StatePlugin for CalculateTwoFibonacciSeriesSequentially {
    const TYPE: &'static str = "CalculateTwoFibonacciSeriesSequentially";

    fn new(base: StateBase) -> Self {
        Self {
            machine: StateMachine::new(base),
        }
    }
}

impl State for CalculateTwoFibonacciSeriesSequentially {
    fn base(&self) -> &StateBase {
        self.machine.base()
    }

    fn base_mut(&mut self) -> &mut StateBase {
        self.machine.base_mut()
    }

    fn construct_impl(&mut self) -> bool {
        self.machine
            .base_mut()
            .set_outcomes(Outcomes::new([outcomes::success()]));
        self.machine.set_restart_on_execution(true);
        match self.add_children() {
            Ok(()) => true,
            Err(e) => {
                warn!(state = %self.machine.base().nested_name(), error = %e, "Failed to create child states");
                false
            }
        }
    }

    fn inconsistencies_impl(&self) -> Inconsistencies {
        self.machine.inconsistencies_impl()
    }

    fn save_settings_impl(&self, settings: &mut Settings) {
        if let Some(order) = self.order() {
            settings.add_parameter(Parameter::new("order", order));
        }
    }

    fn load_settings_impl(&mut self, settings: &Settings) -> bool {
        if settings.parameter_is_registered("order") {
            match settings.get::<i32>("order") {
                Ok(order) => self.set_order(order),
                Err(_) => return false,
            }
        }
        true
    }

    fn run_mid_execution(&self) -> Outcome {
        self.machine.run_mid_execution()
    }

    fn on_preemption_request(&self) {
        self.machine.on_preemption_request();
    }

    fn progress_impl(&self) -> Progress {
        self.machine.progress_impl()
    }

    fn as_state_machine(&self) -> Option<&StateMachine> {
        Some(&self.machine)
    }

    fn as_state_machine_mut(&mut self) -> Option<&mut StateMachine> {
        Some(&mut self.machine)
    }
}

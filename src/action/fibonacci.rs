// Fibonacci action: the demo server the example states talk to

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use super::{Action, ActionError, ActionServer, FeedbackPublisher};

pub struct FibonacciAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibonacciGoal {
    pub order: i32,
}

/// Sequence computed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibonacciFeedback {
    pub sequence: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibonacciResult {
    pub sequence: Vec<i64>,
}

impl Action for FibonacciAction {
    type Goal = FibonacciGoal;
    type Feedback = FibonacciFeedback;
    type Result = FibonacciResult;

    const NAME: &'static str = "fibonacci";
}

/// Computes the series one element per step, sleeping `step_delay` in between.
///
/// A goal of order `n` yields `F(0)..=F(n)`, so the result holds `n + 1`
/// elements and ends with `F(n)`. Feedback is published for every element
/// computed past the seed.
#[derive(Debug, Clone)]
pub struct FibonacciServer {
    step_delay: Duration,
}

impl FibonacciServer {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl ActionServer<FibonacciAction> for FibonacciServer {
    async fn execute(
        &self,
        goal: FibonacciGoal,
        feedback: FeedbackPublisher<FibonacciFeedback>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<FibonacciResult, ActionError> {
        if goal.order < 0 {
            return Err(ActionError::Rejected(format!(
                "negative order {}",
                goal.order
            )));
        }

        let mut sequence: Vec<i64> = vec![0, 1];
        sequence.truncate(goal.order as usize + 1);
        for i in 1..goal.order as usize {
            if *cancel.borrow() {
                debug!(order = goal.order, step = i, "Fibonacci goal cancelled");
                return Err(ActionError::Cancelled);
            }

            let next = sequence[i]
                .checked_add(sequence[i - 1])
                .ok_or_else(|| ActionError::Failed(format!("overflow at step {i}")))?;
            sequence.push(next);
            feedback.publish(FibonacciFeedback {
                sequence: sequence.clone(),
            });

            tokio::select! {
                Ok(()) = cancel.changed() => {
                    if *cancel.borrow() {
                        debug!(order = goal.order, step = i, "Fibonacci goal cancelled");
                        return Err(ActionError::Cancelled);
                    }
                }
                _ = sleep(self.step_delay) => {}
            }
        }

        Ok(FibonacciResult { sequence })
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::engine::types::{NestedName, Outcome};

/// Execution counters across every state of the process
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    pub executions: AtomicU64,
    pub successes: AtomicU64,
    pub preemptions: AtomicU64,
    pub failures: AtomicU64,
    pub other_outcomes: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome.label() {
            Outcome::SUCCESS => &self.successes,
            Outcome::PREEMPTION => &self.preemptions,
            Outcome::FAILURE => &self.failures,
            _ => &self.other_outcomes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> ExecutionStats {
        ExecutionStats {
            executions: self.executions.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            other_outcomes: self.other_outcomes.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Execution metrics: executions={}, successes={}, preemptions={}, failures={}, other={}",
            stats.executions,
            stats.successes,
            stats.preemptions,
            stats.failures,
            stats.other_outcomes
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStats {
    pub executions: u64,
    pub successes: u64,
    pub preemptions: u64,
    pub failures: u64,
    pub other_outcomes: u64,
}

/// Global metrics instance
static EXECUTION_METRICS: std::sync::LazyLock<ExecutionMetrics> =
    std::sync::LazyLock::new(ExecutionMetrics::new);

pub fn execution_metrics() -> &'static ExecutionMetrics {
    &EXECUTION_METRICS
}

/// Times one execution cycle of a state
pub struct ExecutionTimer {
    state: String,
    start: Instant,
}

impl ExecutionTimer {
    pub fn new(state: &NestedName) -> Self {
        Self {
            state: state.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self, outcome: &Outcome) -> Duration {
        let duration = self.start.elapsed();
        debug!(
            state = %self.state,
            outcome = %outcome,
            duration_ms = duration.as_millis(),
            "Execution cycle completed"
        );
        duration
    }
}

// Executor: runs a state tree on a dedicated thread and controls it from others

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::engine::lifecycle::{LifecycleEvent, LifecycleMachine, Phase};
use crate::engine::state::{begin_execution, end_execution, run_cycle, ExecutionError, State, StateExt};
use crate::engine::types::{outcomes, Outcome, Progress};
use crate::telemetry::{create_execution_span, generate_execution_id};

/// Owns the root of a state tree for the duration of its executions.
///
/// `start` returns once the worker thread is running; `request_preemption`,
/// `progress` and `phase` may then be called from any thread. A finished
/// executor can be started again on the same tree.
pub struct Executor {
    root: Arc<dyn State>,
    lifecycle: Arc<Mutex<LifecycleMachine>>,
    worker: Mutex<Option<JoinHandle<Outcome>>>,
}

impl Executor {
    pub fn new(root: Box<dyn State>) -> Self {
        Self {
            root: Arc::from(root),
            lifecycle: Arc::new(Mutex::new(LifecycleMachine::start())),
            worker: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &(dyn State + 'static) {
        self.root.as_ref()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.lifecycle).inner().phase()
    }

    /// Number of executions started on this tree.
    pub fn runs(&self) -> u32 {
        lock(&self.lifecycle).inner().runs()
    }

    pub fn is_running(&self) -> bool {
        self.root.is_running()
    }

    /// Starts one execution cycle of the root on a new thread.
    ///
    /// The outcome of the previous cycle must have been collected with `wait`.
    pub fn start(&self) -> Result<(), ExecutionError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            let state = self.root.nested_name().to_string();
            return Err(if self.root.is_running() {
                ExecutionError::AlreadyRunning { state }
            } else {
                ExecutionError::OutcomeNotCollected { state }
            });
        }
        begin_execution(self.root.as_ref())?;
        lock(&self.lifecycle).handle(&LifecycleEvent::Start);

        let execution_id = generate_execution_id();
        let name = self.root.nested_name().to_string();
        let span = create_execution_span(&name, &execution_id);
        let root = self.root.clone();
        let lifecycle = self.lifecycle.clone();

        let spawned = thread::Builder::new()
            .name(format!("execute-{name}"))
            .spawn(move || {
                let _guard = span.enter();
                let outcome = run_cycle(root.as_ref());
                lock(&lifecycle).handle(&LifecycleEvent::Finish {
                    outcome: outcome.to_string(),
                });
                outcome
            });

        match spawned {
            Ok(handle) => {
                info!(state = %name, execution_id = %execution_id, "Execution started");
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                end_execution(self.root.base());
                lock(&self.lifecycle).handle(&LifecycleEvent::Finish {
                    outcome: outcomes::failure().to_string(),
                });
                Err(ExecutionError::WorkerFailed {
                    state: name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Non-blocking. Ignored unless an execution is in progress.
    pub fn request_preemption(&self) {
        if !self.root.is_running() {
            warn!(state = %self.root.nested_name(), "Preemption requested while not executing");
            return;
        }
        lock(&self.lifecycle).handle(&LifecycleEvent::Preempt);
        self.root.request_preemption();
    }

    pub fn progress(&self) -> Progress {
        self.root.progress()
    }

    /// Blocks until the current execution ends and returns its outcome.
    pub fn wait(&self) -> Result<Outcome, ExecutionError> {
        let handle = lock(&self.worker).take();
        let Some(handle) = handle else {
            return Err(ExecutionError::NotStarted {
                state: self.root.nested_name().to_string(),
            });
        };
        handle.join().map_err(|_| ExecutionError::WorkerFailed {
            state: self.root.nested_name().to_string(),
            reason: "execution thread panicked".to_string(),
        })
    }

    /// `start` followed by `wait`.
    pub fn run(&self) -> Result<Outcome, ExecutionError> {
        self.start()?;
        self.wait()
    }

    /// Gives the tree back once no execution is in progress.
    pub fn into_root(self) -> Result<Arc<dyn State>, ExecutionError> {
        if self.root.is_running() {
            return Err(ExecutionError::AlreadyRunning {
                state: self.root.nested_name().to_string(),
            });
        }
        Ok(self.root)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

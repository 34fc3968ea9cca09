// Blocking client for action servers on the bus

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::{runtime, Action, ActionBus, ActionError, ActionOutcome, ActionServer, FeedbackPublisher};

type FeedbackCallback<F> = Arc<dyn Fn(F) + Send + Sync>;

const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sends goals to the server registered under one name.
///
/// `execute` blocks the calling thread. `cancel_execution` may be called from
/// any other thread and is sticky: once cancelled, the client does not start
/// new goals.
pub struct ActionClient<A: Action> {
    bus: Arc<ActionBus>,
    name: String,
    server_timeout: Option<Duration>,
    execution_timeout: Option<Duration>,
    cancel: watch::Sender<bool>,
    result: RwLock<Option<A::Result>>,
    feedback_cb: RwLock<Option<FeedbackCallback<A::Feedback>>>,
}

impl<A: Action> ActionClient<A> {
    pub fn new(bus: Arc<ActionBus>, name: impl Into<String>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            bus,
            name: name.into(),
            server_timeout: None,
            execution_timeout: None,
            cancel,
            result: RwLock::new(None),
            feedback_cb: RwLock::new(None),
        }
    }

    /// How long `execute` waits for the server to be registered. Without it,
    /// a missing server is reported immediately.
    pub fn with_server_timeout(mut self, server_timeout: Duration) -> Self {
        self.server_timeout = Some(server_timeout);
        self
    }

    pub fn with_execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.execution_timeout = Some(execution_timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_feedback_cb(&self, cb: impl Fn(A::Feedback) + Send + Sync + 'static) {
        *self
            .feedback_cb
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(cb));
    }

    /// Result of the last succeeded goal.
    pub fn result(&self) -> Option<A::Result> {
        self.result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Non-blocking.
    pub fn cancel_execution(&self) {
        self.cancel.send_replace(true);
        debug!(action = %self.name, "Goal cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Runs `goal` to completion on the action runtime.
    pub fn execute(&self, goal: A::Goal) -> ActionOutcome {
        let rt = match runtime() {
            Ok(rt) => rt,
            Err(e) => return ActionOutcome::Aborted(e.to_string()),
        };

        let cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return ActionOutcome::Cancelled;
        }

        rt.block_on(async {
            let Some(server) = self.wait_for_server().await else {
                warn!(action = %self.name, "Action server unavailable");
                return ActionOutcome::ServerUnavailable;
            };

            debug!(action = %self.name, goal = ?goal, "Sending goal");
            let run = server.execute(goal, self.publisher(), cancel);
            let result = match self.execution_timeout {
                Some(limit) => match timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.cancel.send_replace(true);
                        return ActionOutcome::TimedOut;
                    }
                },
                None => run.await,
            };

            match result {
                Ok(result) => {
                    *self.result.write().unwrap_or_else(PoisonError::into_inner) = Some(result);
                    ActionOutcome::Succeeded
                }
                Err(ActionError::Cancelled) => ActionOutcome::Cancelled,
                Err(e) => ActionOutcome::Aborted(e.to_string()),
            }
        })
    }

    async fn wait_for_server(&self) -> Option<Arc<dyn ActionServer<A>>> {
        let deadline = self.server_timeout.map(|limit| Instant::now() + limit);
        loop {
            if let Some(server) = self.bus.server::<A>(&self.name) {
                return Some(server);
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => sleep(SERVER_POLL_INTERVAL).await,
                _ => return None,
            }
        }
    }

    fn publisher(&self) -> FeedbackPublisher<A::Feedback> {
        let cb = self
            .feedback_cb
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cb {
            Some(cb) => FeedbackPublisher::new(cb),
            None => FeedbackPublisher::discard(),
        }
    }
}

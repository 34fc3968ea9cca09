// Action dispatch - in-process asynchronous goals with feedback and cancellation
//
// Servers run on a shared tokio runtime. States call them through the blocking
// `ActionClient`, which keeps the engine's execution threads synchronous.

pub mod client;
pub mod fibonacci;

use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, info};

pub use client::ActionClient;
pub use fibonacci::{FibonacciAction, FibonacciFeedback, FibonacciGoal, FibonacciResult, FibonacciServer};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Goal rejected: {0}")]
    Rejected(String),
    #[error("Goal cancelled")]
    Cancelled,
    #[error("Action failed: {0}")]
    Failed(String),
    #[error("Action runtime unavailable: {0}")]
    Runtime(String),
}

/// Request/feedback/result types of one kind of action.
pub trait Action: Send + Sync + 'static {
    type Goal: Clone + fmt::Debug + Send + Sync + 'static;
    type Feedback: Clone + fmt::Debug + Send + Sync + 'static;
    type Result: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;
}

/// Terminal status of a goal as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Cancelled,
    Aborted(String),
    ServerUnavailable,
    TimedOut,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded)
    }

    pub fn cancelled(&self) -> bool {
        matches!(self, ActionOutcome::Cancelled)
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Succeeded => f.write_str("succeeded"),
            ActionOutcome::Cancelled => f.write_str("cancelled"),
            ActionOutcome::Aborted(reason) => write!(f, "aborted ({reason})"),
            ActionOutcome::ServerUnavailable => f.write_str("server unavailable"),
            ActionOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Channel a server uses to stream intermediate results to the client.
pub struct FeedbackPublisher<F> {
    sink: Arc<dyn Fn(F) + Send + Sync>,
}

impl<F> FeedbackPublisher<F> {
    pub fn new(sink: Arc<dyn Fn(F) + Send + Sync>) -> Self {
        Self { sink }
    }

    /// Publisher dropping everything.
    pub fn discard() -> Self {
        Self {
            sink: Arc::new(|_| {}),
        }
    }

    pub fn publish(&self, feedback: F) {
        (self.sink)(feedback);
    }
}

#[async_trait]
pub trait ActionServer<A: Action>: Send + Sync {
    /// Works on `goal` until done. Must return `ActionError::Cancelled` soon
    /// after `cancel` turns true.
    async fn execute(
        &self,
        goal: A::Goal,
        feedback: FeedbackPublisher<A::Feedback>,
        cancel: watch::Receiver<bool>,
    ) -> Result<A::Result, ActionError>;
}

static RUNTIME: LazyLock<Result<Runtime, std::io::Error>> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("action-server")
        .enable_time()
        .build()
});

/// Runtime every action server runs on.
pub fn runtime() -> Result<&'static Runtime, ActionError> {
    RUNTIME
        .as_ref()
        .map_err(|e| ActionError::Runtime(e.to_string()))
}

/// Registry of action servers by name, e.g. `/fibonacci`.
#[derive(Default)]
pub struct ActionBus {
    servers: RwLock<BTreeMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBus")
            .field("servers", &self.names())
            .finish()
    }
}

impl ActionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `name` with `server`, replacing any previous server.
    pub fn register<A: Action>(&self, name: &str, server: Arc<dyn ActionServer<A>>) {
        let entry: Arc<dyn Any + Send + Sync> = Arc::new(server);
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), entry);
        info!(action = %name, action_type = A::NAME, "Action server registered");
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            debug!(action = %name, "Action server unregistered");
        }
        removed
    }

    /// Server for `name`, if one of action type `A` is registered.
    pub fn server<A: Action>(&self, name: &str) -> Option<Arc<dyn ActionServer<A>>> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        servers
            .get(name)?
            .downcast_ref::<Arc<dyn ActionServer<A>>>()
            .cloned()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_server_lookup_checks_action_type() {
        let bus = ActionBus::new();
        bus.register::<FibonacciAction>(
            "/fibonacci",
            Arc::new(FibonacciServer::new(Duration::ZERO)),
        );

        assert!(bus.is_available("/fibonacci"));
        assert!(bus.server::<FibonacciAction>("/fibonacci").is_some());
        assert!(bus.server::<FibonacciAction>("/other").is_none());
        assert_eq!(bus.names(), vec!["/fibonacci".to_string()]);

        assert!(bus.unregister("/fibonacci"));
        assert!(!bus.unregister("/fibonacci"));
        assert!(bus.server::<FibonacciAction>("/fibonacci").is_none());
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(ActionOutcome::Succeeded.succeeded());
        assert!(!ActionOutcome::Succeeded.cancelled());
        assert!(ActionOutcome::Cancelled.cancelled());
        assert_eq!(
            ActionOutcome::Aborted("negative order".to_string()).to_string(),
            "aborted (negative order)"
        );
    }
}

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging. RUST_LOG takes precedence over the
/// configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!("Mission engine telemetry initialized");
    Ok(())
}

/// Generate an id linking every event of one execution
pub fn generate_execution_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span covering the execution of one state tree
pub fn create_execution_span(root: &str, execution_id: &str) -> tracing::Span {
    tracing::info_span!(
        "execution",
        state.root = root,
        execution.id = execution_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_unique() {
        let first = generate_execution_id();
        let second = generate_execution_id();
        assert_ne!(first, second);
        assert_eq!(first.len(), 36);
    }
}

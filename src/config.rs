use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::engine::context::MapParameterSource;
use crate::engine::settings::ParameterValue;

const SERVER_TIMEOUT_PARAMETER: &str =
    "/state_machine_example/calculate_fibonacci_series/server_wait_timeout_ms";

/// Main configuration structure for the mission engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Action server settings
    pub actions: ActionConfig,
    /// Values served to states through the parameter source
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionConfig {
    /// Delay between two Fibonacci feedback steps
    pub fibonacci_step_delay_ms: u64,
    /// How long a client waits for its server to appear
    pub server_wait_timeout_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            fibonacci_step_delay_ms: 100,
            server_wait_timeout_ms: 1000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig::default(),
            actions: ActionConfig::default(),
            parameters: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (mission-engine.toml)
    /// 3. Environment variables (prefixed with MISSION_ENGINE_)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("mission-engine.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = Config::try_from(&EngineConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("MISSION_ENGINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Parameter source serving the `parameters` table.
    ///
    /// The action server wait timeout is served as well unless the table sets it.
    pub fn parameter_source(&self) -> MapParameterSource {
        let mut values = self.parameters.clone();
        values
            .entry(SERVER_TIMEOUT_PARAMETER.to_string())
            .or_insert_with(|| {
                ParameterValue::Int(
                    i64::try_from(self.actions.server_wait_timeout_ms).unwrap_or(i64::MAX),
                )
            });
        MapParameterSource::new(values)
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<EngineConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = EngineConfig::load_env_file();
        EngineConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static EngineConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    message_queue::MessageQueueConfig,
    orchestrator::OrchestratorConfig,
};

/// Default config file locations tried when no path is given
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/orchestrator.toml",
    "orchestrator.toml",
    "/etc/orchestrator/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub message_queue: MessageQueueConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: `ORCHESTRATOR_`, nested
    ///    keys separated by `__`, e.g. `ORCHESTRATOR_DATABASE__URL`)
    ///
    /// An explicit `config_path` that does not exist is an error; when no
    /// path is given the default locations are tried and skipped if absent.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("failed to build defaults")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("config file not found: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("failed to parse TOML config")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config to TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.database
            .validate()
            .context("database configuration is invalid")?;
        self.message_queue
            .validate()
            .context("message queue configuration is invalid")?;
        self.orchestrator
            .validate()
            .context("orchestrator configuration is invalid")?;
        self.api.validate().context("api configuration is invalid")?;
        self.observability
            .validate()
            .context("observability configuration is invalid")?;

        Ok(())
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            request_timeout_seconds: 30,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("api bind_address must not be empty"));
        }

        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "api bind_address is not a valid socket address: {}",
                self.bind_address
            ));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "api request_timeout_seconds must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_endpoint: String,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_endpoint: "/metrics".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "invalid log level: {}, expected one of {:?}",
                self.log_level,
                valid_levels
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!(
                "invalid log format: {}, expected one of {:?}",
                self.log_format,
                valid_formats
            ));
        }

        if self.metrics_enabled && !self.metrics_endpoint.starts_with('/') {
            return Err(anyhow::anyhow!("metrics_endpoint must start with '/'"));
        }

        Ok(())
    }
}

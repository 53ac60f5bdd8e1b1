use serde::{Deserialize, Serialize};

/// Per service kind deadline (seconds) before an in-flight stage is
/// considered timed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageDeadlines {
    pub obs: u64,
    pub upload: u64,
    pub test: u64,
    pub replicate: u64,
    pub publish: u64,
    pub deprecate: u64,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            obs: 3600,
            upload: 7200,
            test: 3600,
            replicate: 3600,
            publish: 1800,
            deprecate: 1800,
        }
    }
}

impl StageDeadlines {
    /// Look up a deadline by service kind name
    pub fn for_kind(&self, kind: &str) -> Option<u64> {
        match kind {
            "obs" => Some(self.obs),
            "upload" => Some(self.upload),
            "test" => Some(self.test),
            "replicate" => Some(self.replicate),
            "publish" => Some(self.publish),
            "deprecate" => Some(self.deprecate),
            _ => None,
        }
    }

    fn all(&self) -> [(&'static str, u64); 6] {
        [
            ("obs", self.obs),
            ("upload", self.upload),
            ("test", self.test),
            ("replicate", self.replicate),
            ("publish", self.publish),
            ("deprecate", self.deprecate),
        ]
    }
}

/// Retry backoff applied after a stage times out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryBackoffConfig {
    pub base_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: 60,
            max_interval_seconds: 3600,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Dispatcher and timeout monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub dispatch_interval_seconds: u64,
    pub monitor_interval_seconds: u64,
    pub listener_idle_poll_ms: u64,
    /// Retry limit applied to jobs that do not set their own
    pub default_max_attempts: u32,
    pub recover_on_startup: bool,
    pub stage_deadlines: StageDeadlines,
    pub retry: RetryBackoffConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_seconds: 5,
            monitor_interval_seconds: 30,
            listener_idle_poll_ms: 100,
            default_max_attempts: 3,
            recover_on_startup: true,
            stage_deadlines: StageDeadlines::default(),
            retry: RetryBackoffConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "dispatch_interval_seconds must be greater than 0"
            ));
        }

        if self.monitor_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "monitor_interval_seconds must be greater than 0"
            ));
        }

        if self.default_max_attempts == 0 {
            return Err(anyhow::anyhow!("default_max_attempts must be at least 1"));
        }

        for (kind, deadline) in self.stage_deadlines.all() {
            if deadline == 0 {
                return Err(anyhow::anyhow!(
                    "stage deadline for {kind} must be greater than 0"
                ));
            }
        }

        let retry = &self.retry;
        if retry.base_interval_seconds > retry.max_interval_seconds {
            return Err(anyhow::anyhow!(
                "retry.base_interval_seconds must not exceed retry.max_interval_seconds"
            ));
        }

        if retry.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("retry.backoff_multiplier must be >= 1.0"));
        }

        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(anyhow::anyhow!(
                "retry.jitter_factor must be between 0.0 and 1.0"
            ));
        }

        Ok(())
    }
}

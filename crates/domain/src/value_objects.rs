use serde::{Deserialize, Serialize};

/// Externally visible job identifier
pub type JobId = String;

/// Stage identifier, unique within its job
pub type StageId = String;

/// Metadata identifying the artifact being released
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ImageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            provider: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

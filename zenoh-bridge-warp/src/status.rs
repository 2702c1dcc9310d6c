//! Bridge status reporting.

use serde::{Deserialize, Serialize};

/// Bridge status information, published on `<prefix>/@/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Service name the bridge registered under.
    pub service: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline").
    pub status: String,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(service: impl Into<String>) -> Self {
        Self::with_state(service, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(service: impl Into<String>) -> Self {
        Self::with_state(service, "offline")
    }

    fn with_state(service: impl Into<String>, status: &str) -> Self {
        Self {
            service: service.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

//! Error types for the WARP bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No usable HTTP response: timeout, refused connection, error status.
    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Response body was empty, null, not JSON or missing a field.
    #[error("Decode error on {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// A device code fell outside a lookup table that has no fallback.
    #[error("Unmapped {field} value: {value}")]
    UnmappedValue { field: &'static str, value: i64 },

    /// Invalid or unsupported configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A property path was declared twice.
    #[error("Property {0} is already declared")]
    DuplicateProperty(String),

    /// A property path was used without being declared.
    #[error("Property {0} is not declared")]
    UnknownProperty(String),

    /// A value's kind does not match the declared property.
    #[error("Value {value} is not compatible with property {path}")]
    TypeMismatch { path: String, value: String },

    /// Publishing or subscribing on the bus failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a transport error for an endpoint.
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error for an endpoint.
    pub fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a bus error.
    pub fn bus(msg: impl ToString) -> Self {
        Self::Bus(msg.to_string())
    }

    /// Endpoint a transport or decode error happened on.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Transport { endpoint, .. } | Self::Decode { endpoint, .. } => {
                Some(endpoint.as_str())
            }
            _ => None,
        }
    }

    /// Whether the error belongs to a single poll cycle and can be
    /// suppressed until the next tick.
    pub fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Decode { .. } | Self::UnmappedValue { .. }
        )
    }
}

impl From<warp_bridge_common::Error> for BridgeError {
    fn from(err: warp_bridge_common::Error) -> Self {
        match err {
            warp_bridge_common::Error::Config(msg) => Self::Configuration(msg),
            warp_bridge_common::Error::Io(e) => Self::Io(e),
            other => Self::Bus(other.to_string()),
        }
    }
}

impl From<zenoh::Error> for BridgeError {
    fn from(err: zenoh::Error) -> Self {
        Self::Bus(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_cycle_classification() {
        assert!(BridgeError::transport("/evse/state", "timed out").is_per_cycle());
        assert!(BridgeError::decode("/evse/state", "empty body").is_per_cycle());
        assert!(
            BridgeError::UnmappedValue {
                field: "charger_state",
                value: 9
            }
            .is_per_cycle()
        );
        assert!(!BridgeError::config("position 5").is_per_cycle());
        assert!(!BridgeError::DuplicateProperty("/Status".into()).is_per_cycle());
    }

    #[test]
    fn test_messages_name_the_endpoint() {
        let err = BridgeError::transport("/evse/hardware_configuration", "HTTP 500");
        assert_eq!(
            err.to_string(),
            "Transport error on /evse/hardware_configuration: HTTP 500"
        );
        assert_eq!(err.endpoint(), Some("/evse/hardware_configuration"));
        assert_eq!(BridgeError::Bus("closed".into()).endpoint(), None);
    }
}

use thiserror::Error;

/// Failure at the broker connection layer.
///
/// Never retried by the bridge; surfaced to whoever issued the operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Broker connection is not established")]
    NotConnected,

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(String),
}

/// Outcome of a correlated station command that did not produce a reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No reply for request {request_id} within {timeout_ms} ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    #[error("Station {station_id} stayed busy for {timeout_ms} ms")]
    StationBusy { station_id: String, timeout_ms: u64 },

    #[error("Request {0} was cancelled")]
    Cancelled(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl CommandError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Timeout { .. } | Self::StationBusy { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Serialization(_) => "serialization_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StationBusy { .. })
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts_into_command_error() {
        let err: CommandError = TransportError::NotConnected.into();
        assert_eq!(err.kind(), "transport_error");
        assert_eq!(err.to_string(), "Broker connection is not established");
    }

    #[test]
    fn test_timeout_message() {
        let err = CommandError::Timeout {
            request_id: "r-1".to_string(),
            timeout_ms: 5000,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "No reply for request r-1 within 5000 ms");
    }

    #[test]
    fn test_busy_station_counts_as_timeout() {
        let err = CommandError::StationBusy {
            station_id: "9".to_string(),
            timeout_ms: 2000,
        };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), "Station 9 stayed busy for 2000 ms");
    }
}

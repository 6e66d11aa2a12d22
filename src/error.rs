// src/error.rs

/// Result type used throughout the shardwatch library
pub type ShardwatchResult<T> = Result<T, ShardwatchError>;

/// All possible errors that can occur in the shardwatch library
#[derive(thiserror::Error, Debug)]
pub enum ShardwatchError {
    /// Configuration-related errors. Always fatal at startup.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A generated rule, policy or route violates its invariants
    #[error("Invalid rule '{rule_id}': {message}")]
    InvalidRule { rule_id: String, message: String },

    /// Metric query failed or timed out
    #[error("Metric query for '{metric_name}' failed: {message}")]
    MetricQuery { metric_name: String, message: String },

    /// Callback execution failed
    #[error("Callback execution failed for '{operation}': {message}")]
    CallbackFailed { operation: String, message: String },

    /// Controller is not running or has stopped
    #[error("Controller is not running: {message}")]
    ControllerNotRunning { message: String },

    /// Channel communication error (internal)
    #[error("Internal channel error: {message}")]
    ChannelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// TOML configuration could not be parsed
    #[cfg(feature = "config-toml")]
    #[error("TOML parse error: {source}")]
    TomlParse {
        #[from]
        source: toml::de::Error,
    },

    /// Prometheus registry errors
    #[cfg(feature = "prometheus-metrics")]
    #[error("Prometheus error: {source}")]
    Prometheus {
        #[from]
        source: prometheus::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl ShardwatchError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_rule<S: Into<String>, M: Into<String>>(rule_id: S, message: M) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }

    pub fn metric_query<S: Into<String>, M: Into<String>>(metric_name: S, message: M) -> Self {
        Self::MetricQuery {
            metric_name: metric_name.into(),
            message: message.into(),
        }
    }

    pub fn callback_failed<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        Self::CallbackFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn controller_not_running<S: Into<String>>(message: S) -> Self {
        Self::ControllerNotRunning {
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Whether this error must stop the process (configuration-time errors only)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidRule { .. })
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ShardwatchError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelError {
            message: format!("Failed to send on channel: {}", error),
        }
    }
}

/// Convert from channel receive errors
impl From<tokio::sync::oneshot::error::RecvError> for ShardwatchError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelError {
            message: format!("Failed to receive on channel: {}", error),
        }
    }
}

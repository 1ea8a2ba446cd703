//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that stop a source from starting, or a point from being published.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Logging or bus settings that cannot be applied.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read configuration {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A put on the bus failed; the source keeps running.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<busline_common::Error> for BridgeError {
    fn from(err: busline_common::Error) -> Self {
        match err {
            busline_common::Error::Config(msg) => Self::Config(msg),
            busline_common::Error::Zenoh(e) => Self::ZenohConnection(e.to_string()),
            other => Self::Serialization(other.to_string()),
        }
    }
}

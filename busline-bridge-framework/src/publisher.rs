//! Data point publisher for Zenoh.

use std::sync::Arc;

use busline_common::{Format, KeyExprBuilder, TelemetryPoint, encode};

use crate::error::{BridgeError, Result};

/// Publisher for sending data points to Zenoh.
///
/// Wraps a Zenoh session and derives each point's key from its dotted
/// metric name under the configured prefix.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::with_prefix(key_prefix),
            format,
        }
    }

    /// Get the key builder.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Publish a data point to the key derived from its metric name.
    pub async fn publish(&self, point: &TelemetryPoint) -> Result<()> {
        let key = self.keys.metric(&point.metric);
        let payload =
            encode(point, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;

        self.publish_raw(&key, payload).await
    }

    /// Publish raw bytes to a full key (for status messages, etc.).
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Publish a JSON value to a full key.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

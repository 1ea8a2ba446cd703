use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single data point published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Unix epoch milliseconds when the measurement was taken.
    pub timestamp: i64,

    /// Identifier of the publishing source (e.g. "modbus").
    pub source: String,

    /// Dotted metric name (e.g. "room.E4.power").
    pub metric: String,

    /// The measured value, or a gap marker.
    pub value: TelemetryValue,

    /// Additional context labels (e.g. unit).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl TelemetryPoint {
    /// Create a new data point stamped with the current time.
    pub fn new(source: impl Into<String>, metric: impl Into<String>, value: TelemetryValue) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            metric: metric.into(),
            value,
            labels: HashMap::new(),
        }
    }

    /// Override the timestamp (Unix epoch milliseconds).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a label to this data point.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Whether this point marks missing data rather than a measurement.
    pub fn is_gap(&self) -> bool {
        matches!(self.value, TelemetryValue::Gap { .. })
    }
}

/// Value carried by a [`TelemetryPoint`].
///
/// Serialized untagged: a gauge is a bare number, a gap is an object with
/// a `fault` field. Subscribers use this to tell "device down" apart from
/// "nothing collected yet".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Numeric measurement.
    Gauge(f64),

    /// No value could be obtained for this tick.
    Gap {
        /// Fault classification (e.g. "connection", "timeout", "decode").
        fault: String,
        /// Whether the fault is expected to clear on its own.
        retryable: bool,
    },
}

impl TelemetryValue {
    /// Build a gap marker.
    pub fn gap(fault: impl Into<String>, retryable: bool) -> Self {
        TelemetryValue::Gap {
            fault: fault.into(),
            retryable,
        }
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

impl From<f32> for TelemetryValue {
    fn from(v: f32) -> Self {
        TelemetryValue::Gauge(f64::from(v))
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

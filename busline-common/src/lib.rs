//! busline common library
//!
//! Shared building blocks for busline metric sources:
//!
//! - [`telemetry`] - Data points published on the bus (`TelemetryPoint`, `TelemetryValue`)
//! - [`serialization`] - JSON/CBOR payload encoding and decoding
//! - [`config`] - Zenoh and logging settings shared by every source
//! - [`session`] - Zenoh session setup
//! - [`keyexpr`] - Mapping between dotted metric names and key expressions
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder, metric_from_key, metric_key_suffix};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use telemetry::{TelemetryPoint, TelemetryValue, current_timestamp_millis};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set. Zenoh's own
/// logging is capped at `warn` unless `RUST_LOG` says otherwise.
///
/// # Example
///
/// ```ignore
/// use busline_common::{LogFormat, LoggingConfig, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("{},zenoh=warn", config.level))
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}

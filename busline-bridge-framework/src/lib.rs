//! busline bridge framework
//!
//! Common plumbing for sources that publish metrics to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for the bridge lifecycle (startup, signal handling, graceful shutdown)
//! - [`Publisher`] for publishing data points to Zenoh with automatic serialization
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use busline_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mysource.json5");
//!     let config = MySourceConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new("mysource", config, Some(&args)).await?;
//!     let workers = start_workers(runner.publisher());
//!
//!     // Runs until Ctrl+C / SIGTERM, then awaits `workers.stop()`
//!     runner.run(None, workers.stop()).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::Publisher;
pub use runner::{BridgeRunner, shutdown_signal};
pub use status::{BridgeStatus, StatusPublisher};

// Re-export commonly used types from busline-common
pub use busline_common::{Format, LoggingConfig, TelemetryPoint, TelemetryValue, ZenohConfig};

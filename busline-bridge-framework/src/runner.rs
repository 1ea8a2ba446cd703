//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use busline_common::{LoggingConfig, connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::status::StatusPublisher;

/// Upper bound on how long workers get to stop after a shutdown signal.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Bridge runner that manages the lifecycle of a source.
///
/// Handles:
/// - Logging initialization (with CLI override)
/// - Zenoh connection
/// - Status publishing (optional)
/// - Waiting for Ctrl+C / SIGTERM
/// - Graceful worker shutdown, then closing the Zenoh session
///
/// # Example
///
/// ```ignore
/// let runner = BridgeRunner::new("modbus", config, Some(&args))
///     .await?
///     .with_status_publishing();
///
/// let running = start_source(runner.publisher());
/// runner.run(None, running.shutdown()).await?;
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// The loaded configuration.
    config: C,
    /// Zenoh session.
    session: Arc<zenoh::Session>,
    /// Publisher for data points.
    publisher: Publisher,
    /// Status publisher (optional).
    status_publisher: Option<StatusPublisher>,
    /// How long workers may take to stop.
    shutdown_grace: Duration,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging from config, with the CLI `--log-level` taking precedence
    /// 2. Connect to Zenoh
    /// 3. Create the publisher with the configured prefix and format
    pub async fn new(name: impl Into<String>, config: C, args: Option<&BridgeArgs>) -> Result<Self> {
        let name = name.into();

        let log_config = match args.and_then(|a| a.log_level.clone()) {
            Some(level) => LoggingConfig {
                level,
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = env!("CARGO_PKG_VERSION"), "Starting bridge");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        let publisher = Publisher::new(session.clone(), config.key_prefix(), config.serialization());

        Ok(Self {
            name,
            config,
            session,
            publisher,
            status_publisher: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Publish "running"/"offline" status documents on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            env!("CARGO_PKG_VERSION"),
        ));
        self
    }

    /// Override how long workers may take to stop after the signal.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Run the bridge until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Publish "running" status with `metadata` (if enabled)
    /// 2. Wait for a shutdown signal
    /// 3. Await `stop` (bounded by the shutdown grace period)
    /// 4. Publish "offline" status (if enabled)
    /// 5. Close the Zenoh session
    pub async fn run<F>(self, metadata: Option<serde_json::Value>, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        shutdown_signal().await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        if !finish_within(self.shutdown_grace, stop).await {
            tracing::warn!(
                bridge = %self.name,
                grace_secs = self.shutdown_grace.as_secs(),
                "Workers did not stop within the grace period"
            );
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve when the process receives Ctrl+C or (on unix) SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Await `stop`, giving up after `grace`. Returns whether it completed.
async fn finish_within<F: Future<Output = ()>>(grace: Duration, stop: F) -> bool {
    tokio::time::timeout(grace, stop).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_within_completes() {
        let done = tokio_test::block_on(finish_within(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }));
        assert!(done);
    }

    #[test]
    fn test_finish_within_gives_up() {
        let done = tokio_test::block_on(finish_within(
            Duration::from_millis(20),
            std::future::pending::<()>(),
        ));
        assert!(!done);
    }
}

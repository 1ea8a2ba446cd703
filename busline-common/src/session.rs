use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate our [`ZenohConfig`] into a native Zenoh configuration.
pub fn zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut native = zenoh::Config::default();
    insert(&mut native, "mode", &serde_json::to_string(config.mode.as_str())?)?;

    if !config.connect.is_empty() {
        insert(
            &mut native,
            "connect/endpoints",
            &serde_json::to_string(&config.connect)?,
        )?;
    }

    if !config.listen.is_empty() {
        insert(
            &mut native,
            "listen/endpoints",
            &serde_json::to_string(&config.listen)?,
        )?;
    }

    Ok(native)
}

fn insert(native: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    native
        .insert_json5(key, value)
        .map_err(|e| Error::Config(format!("Failed to set Zenoh '{}': {}", key, e)))
}

/// Open a Zenoh session using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let native = zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(native).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

use thiserror::Error;

/// Errors from the bus side of a source: session setup and payload coding.
#[derive(Debug, Error)]
pub enum Error {
    /// Zenoh or logging settings that cannot be applied.
    #[error("invalid bus settings: {0}")]
    Config(String),

    #[error("zenoh: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR payload: {0}")]
    Cbor(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

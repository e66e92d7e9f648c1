//! Error types for tracklet-core

use thiserror::Error;

/// Main error type for the tracklet-core library
///
/// None of these escape the public recording API: the recorder absorbs
/// every storage and network failure into its own state (failed queue,
/// retry flags) and logs it.
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery/network error
    #[error("network error: {0}")]
    Network(String),
}

/// Result type alias for tracklet-core
pub type Result<T> = std::result::Result<T, Error>;

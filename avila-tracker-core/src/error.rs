//! Error types for avila-tracker-core
//!
//! None of these reach host-page code through the tracking calls. They
//! surface at capability boundaries (storage, transport) and while loading
//! configuration, where the caller decides how to degrade.

use thiserror::Error;

/// Main error type for the avila-tracker-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error from the durable storage backend
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage capability unavailable or failing
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Network or HTTP failure while delivering an envelope
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for avila-tracker-core
pub type Result<T> = std::result::Result<T, Error>;

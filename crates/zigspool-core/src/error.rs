//! Error types for zigspool.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for message handling.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Startup configuration errors. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The broker endpoint variable is not set.
    #[error("Environment {0} should point to the MQTT server")]
    MissingEndpoint(&'static str),

    /// The broker endpoint could not be parsed.
    #[error("Invalid MQTT endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Errors raised while handling a single bus message.
///
/// These never escape the message router; they are logged with the topic
/// and the message is dropped.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Payload bytes are not valid UTF-8.
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not valid JSON or does not have the expected shape.
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Topic does not have enough segments for its intent.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

/// Spool artifact I/O errors.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Writing the artifact failed.
    #[error("Failed to write spool file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Deleting a stale artifact failed.
    #[error("Failed to delete spool file {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listing the spool directory failed.
    #[error("Failed to read spool directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpoolError {
    /// Path of the artifact or directory involved.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Write { path, .. } | Self::Delete { path, .. } | Self::ReadDir { path, .. } => {
                path
            }
        }
    }
}

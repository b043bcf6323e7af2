//! Error types for netstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using NetstoreError
pub type Result<T> = std::result::Result<T, NetstoreError>;

/// Unified error type for netstore operations
#[derive(Debug, Error)]
pub enum NetstoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors (fatal to the connection)
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Per-request Errors (session continues)
    // -------------------------------------------------------------------------
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Hash mismatch for {0:?}")]
    HashMismatch(String),

    #[error("Upload of {0:?} already in progress in another session")]
    LockContention(String),

    #[error("File not found: {0:?}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Client/Proxy Errors
    // -------------------------------------------------------------------------
    /// The server answered a request with an error status byte.
    #[error("{0} rejected by server")]
    Rejected(&'static str),

    #[error("No backend available")]
    BackendUnavailable,

    #[error("Network error: {0}")]
    Network(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

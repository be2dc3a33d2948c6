//! Error types for the transport layer.

use std::io;

use thiserror::Error;

/// Failures setting up or running a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The webhook listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A transport setting is unusable (e.g. a malformed header name).
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The server stopped with an I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

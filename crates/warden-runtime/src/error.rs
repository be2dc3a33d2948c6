//! Runtime error types.

use thiserror::Error;
use warden_core::{ApiError, StoreError};
use warden_transport::TransportError;

use crate::config::ConfigError;

/// Errors that stop the runtime from starting or keep it from running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener, client construction or serving failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The bot could not learn who it is in a mode that requires it.
    #[error("Failed to resolve bot identity: {0}")]
    Identity(#[source] ApiError),

    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

//! Unified error types for the Warden core.
//!
//! Framework-level errors (handler faults) live in `warden-framework`, and the
//! inbound HTTP rejections live in `warden-transport`.

use thiserror::Error;

// =============================================================================
// Event Errors
// =============================================================================

/// Errors raised while turning wire bytes into an [`Event`](crate::Event).
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The body is not a decodable update.
    #[error("malformed event: {reason}")]
    Malformed {
        /// Reason for failure.
        reason: String,
    },
}

impl EventError {
    /// Creates a malformed-event error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound platform calls.
///
/// Every variant means the upstream platform was unavailable or refused the
/// call. Nothing in the engine retries these; the calling handler decides.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The HTTP exchange itself failed (connect, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The call exceeded its timeout.
    #[error("API call timed out")]
    Timeout,

    /// The platform answered with `ok: false`.
    #[error("platform error ({code}): {description}")]
    Platform {
        /// Platform error code (HTTP-like).
        code: i64,
        /// Human-readable description from the platform.
        description: String,
    },

    /// The response body could not be decoded, or the payload encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation needs data the event does not carry (e.g. no chat).
    #[error("missing {0} in event")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from a [`KvStore`](crate::KvStore) backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored value has an unexpected shape (e.g. `INCR` on text).
    #[error("invalid value for key '{key}'")]
    InvalidValue {
        /// Key that holds the bad value.
        key: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for event parsing.
pub type EventResult<T> = Result<T, EventError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Error types for the dispatch layer.

use thiserror::Error;
use tower::BoxError;

/// Failure of one dispatched handler chain.
///
/// Neither variant escapes the task that ran the chain; both are logged and
/// counted by the [`TaskSupervisor`](crate::TaskSupervisor).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler or a middleware returned an error.
    #[error("handler '{route}' failed: {source}")]
    Handler {
        /// Registration key that was dispatched.
        route: String,
        #[source]
        source: BoxError,
    },

    /// The handler or a middleware panicked.
    #[error("handler '{route}' panicked: {reason}")]
    HandlerFault {
        /// Registration key that was dispatched.
        route: String,
        /// Panic payload, when it was a string.
        reason: String,
    },
}

impl DispatchError {
    pub(crate) fn from_panic(route: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::HandlerFault {
            route: route.to_string(),
            reason,
        }
    }

    pub fn route(&self) -> &str {
        match self {
            Self::Handler { route, .. } | Self::HandlerFault { route, .. } => route,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::HandlerFault { .. })
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

//! Outbound call seam.
//!
//! [`Bot`](crate::Bot) holds an `Arc<dyn ApiCaller>` and never knows which
//! HTTP stack sits behind it. `warden-transport` provides the reqwest-backed
//! caller; [`MockCaller`] records calls for tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ApiResult;

/// Transport-specific Bot API call mechanism.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Invokes `method` with a JSON `payload` and returns the `result` field
    /// of the platform's response envelope.
    ///
    /// `timeout` overrides the caller's default total timeout; long polls
    /// need a budget longer than their server-side wait.
    async fn call_with_timeout(
        &self,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value>;

    /// Invokes `method` with the default timeout.
    async fn call(&self, method: &str, payload: Value) -> ApiResult<Value> {
        self.call_with_timeout(method, payload, None).await
    }
}

type Responder = Arc<dyn Fn(&Value) -> ApiResult<Value> + Send + Sync>;

/// One call captured by [`MockCaller`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub payload: Value,
    pub timeout: Option<Duration>,
}

/// [`ApiCaller`] that answers from canned responders and records every call.
///
/// Methods without a responder succeed with `true`, the platform's answer for
/// most side-effecting calls.
#[derive(Default, Clone)]
pub struct MockCaller {
    responders: Arc<Mutex<HashMap<String, Responder>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `method` with the result of `responder`.
    pub fn on<F>(&self, method: &str, responder: F) -> &Self
    where
        F: Fn(&Value) -> ApiResult<Value> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .insert(method.to_string(), Arc::new(responder));
        self
    }

    /// Answers `method` with a fixed result.
    pub fn respond(&self, method: &str, result: ApiResult<Value>) -> &Self {
        self.on(method, move |_| result.clone())
    }

    /// All calls so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls made to `method`.
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }
}

impl std::fmt::Debug for MockCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCaller")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ApiCaller for MockCaller {
    async fn call_with_timeout(
        &self,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        let responder = self.responders.lock().get(method).cloned();
        let result = match &responder {
            Some(responder) => responder(&payload),
            None => Ok(Value::Bool(true)),
        };

        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            payload,
            timeout,
        });
        result
    }
}

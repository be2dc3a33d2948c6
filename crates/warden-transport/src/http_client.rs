//! reqwest-backed [`ApiCaller`].
//!
//! One pooled `reqwest::Client` is shared by every outbound call. Payloads are
//! encoded into buffers from a [`BufferPool`]; the request body owns the
//! checked-out buffer, which goes back to the pool once reqwest drops the
//! body. Calls are never retried.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use warden_core::{ApiCaller, ApiError, ApiResult, BufferPool, Pooled, buffer_pool};

use crate::error::{TransportError, TransportResult};

/// Default Bot API server.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Outbound HTTP settings.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the Bot API server, without trailing slash.
    pub api_url: String,
    pub token: String,
    pub connect_timeout: Duration,
    /// Total per-request timeout unless a call overrides it.
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    /// Idle encode buffers to retain.
    pub buffer_pool_capacity: usize,
}

impl HttpClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 100,
            pool_idle_timeout: Duration::from_secs(90),
            buffer_pool_capacity: 64,
        }
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// [`ApiCaller`] that POSTs JSON to `{api_url}/bot{token}/{method}`.
pub struct HttpApiCaller {
    client: Client,
    endpoint: String,
    buffers: BufferPool,
}

impl HttpApiCaller {
    pub fn new(config: &HttpClientConfig) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
            buffers: buffer_pool(config.buffer_pool_capacity, 512),
        })
    }

    /// The encode buffer pool, for accounting.
    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    fn encode(&self, payload: &Value) -> ApiResult<Pooled<Vec<u8>>> {
        let mut buf = self.buffers.acquire();
        serde_json::to_writer(&mut *buf, payload)?;
        Ok(buf)
    }
}

/// Maps a reqwest failure without leaking the token-bearing URL.
fn map_reqwest(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(err.without_url().to_string())
    }
}

fn decode_envelope(status: u16, body: &[u8]) -> ApiResult<Value> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&status) => {
            return Err(ApiError::Platform {
                code: i64::from(status),
                description: String::from_utf8_lossy(body).into_owned(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if envelope.ok {
        Ok(envelope.result.unwrap_or(Value::Null))
    } else {
        Err(ApiError::Platform {
            code: envelope.error_code.unwrap_or(i64::from(status)),
            description: envelope.description.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ApiCaller for HttpApiCaller {
    async fn call_with_timeout(
        &self,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        let buf = self.encode(&payload)?;
        trace!(method, bytes = buf.len(), "Encoded API request");
        let body = Bytes::from_owner(buf);

        let mut request = self
            .client
            .post(format!("{}/{method}", self.endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_reqwest)?;

        let result = decode_envelope(status, &bytes);
        if let Err(ref e) = result {
            debug!(method, status, error = %e, "API call failed");
        }
        result
    }
}

impl std::fmt::Debug for HttpApiCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApiCaller")
            .field("buffers", &self.buffers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_ok() {
        let value = decode_envelope(200, br#"{"ok":true,"result":{"id":1}}"#).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_envelope_platform_error() {
        let err = decode_envelope(
            400,
            br#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        match err {
            ApiError::Platform { code, description } => {
                assert_eq!(code, 400);
                assert!(description.contains("chat not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_json_gateway_error() {
        let err = decode_envelope(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ApiError::Platform { code: 502, .. }));
    }

    #[test]
    fn test_body_owns_pooled_buffer() {
        let caller = HttpApiCaller::new(&HttpClientConfig::new("T")).unwrap();
        let body = Bytes::from_owner(caller.encode(&json!({"chat_id": 1, "text": "hi"})).unwrap());
        assert_eq!(&body[..], br#"{"chat_id":1,"text":"hi"}"#);
        assert_eq!(caller.buffers().outstanding(), 1);

        let shared = body.clone();
        drop(body);
        assert_eq!(caller.buffers().outstanding(), 1);
        drop(shared);
        assert_eq!(caller.buffers().outstanding(), 0);
        assert_eq!(caller.buffers().idle(), 1);

        let again = caller.encode(&json!({"chat_id": 2})).unwrap();
        assert_eq!(again.as_slice(), br#"{"chat_id":2}"#);
        assert_eq!(caller.buffers().created(), 1);
    }

    #[cfg(feature = "http-server")]
    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        use axum::{Json, Router, routing::post};

        let app = Router::new().route(
            "/botTEST/sendMessage",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"ok": true, "result": {"echo": body["text"]}}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let config = HttpClientConfig::new("TEST").api_url(format!("http://{addr}/"));
        let caller = HttpApiCaller::new(&config).unwrap();
        let result = caller
            .call("sendMessage", json!({"chat_id": 1, "text": "ping"}))
            .await
            .unwrap();
        assert_eq!(result["echo"], "ping");
    }
}

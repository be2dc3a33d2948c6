//! Webhook adapter.
//!
//! Every request walks the same gate sequence and the first failing gate
//! decides the status code:
//!
//! ```text
//! method ≠ POST ─▶ 405
//! secret header mismatch ─▶ 401
//! token bucket empty ─▶ 429
//! body not an update ─▶ 400
//! update_id seen before ─▶ 200 (not dispatched)
//! otherwise ─▶ dispatch in the background, 200
//! ```
//!
//! The response never waits for the handler. The dedup key is written with
//! an atomic set-if-absent, so concurrent deliveries of the same update race
//! for a single dispatch.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use warden_core::{Event, EventError, KvStore, Update, decode_update};
use warden_framework::Dispatcher;

use crate::error::{TransportError, TransportResult};
use crate::rate_limit::TokenBucket;

/// Header carrying the shared secret.
pub const DEFAULT_SECRET_HEADER: &str = "X-Shared-Secret";

/// Header the platform itself uses to echo a secret registered via `setWebhook`.
pub const PLATFORM_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

pub const DEFAULT_RATE_LIMIT_PER_SECOND: f64 = 30.0;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 60;

/// How long a delivered `update_id` is remembered.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(3600);

/// Webhook listener settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8443`.
    pub listen: String,
    /// Request path, e.g. `/webhook`.
    pub path: String,
    /// Shared secret; `None` disables the header check.
    pub secret: Option<String>,
    pub secret_header: String,
    pub dedup_ttl: Duration,
    /// Sustained requests per second; setting it to `0` opts out of rate limiting.
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8443".to_string(),
            path: "/webhook".to_string(),
            secret: None,
            secret_header: DEFAULT_SECRET_HEADER.to_string(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
        }
    }
}

// =============================================================================
// Rejections and outcomes
// =============================================================================

/// Why a webhook request was refused.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("secret header missing or wrong")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Malformed(#[from] EventError),
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}

/// What happened to an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Handed to a handler in the background.
    Dispatched,
    /// Already seen within the dedup window.
    Duplicate,
    /// Accepted, but no handler matched.
    Unrouted,
}

// =============================================================================
// Server
// =============================================================================

struct WebhookState {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn KvStore>,
    secret: Option<String>,
    secret_header: HeaderName,
    limiter: Option<TokenBucket>,
    dedup_ttl: Duration,
}

impl WebhookState {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), WebhookRejection> {
        let Some(expected) = &self.secret else {
            return Ok(());
        };
        let provided = headers
            .get(&self.secret_header)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        if constant_time_eq(expected.as_bytes(), provided) {
            Ok(())
        } else {
            Err(WebhookRejection::Unauthorized)
        }
    }

    fn admit(&self) -> Result<(), WebhookRejection> {
        match &self.limiter {
            Some(bucket) if !bucket.allow() => Err(WebhookRejection::RateLimited),
            _ => Ok(()),
        }
    }

    /// Dedups, normalizes and dispatches a decoded update.
    async fn ingest(&self, update: Update) -> IngestOutcome {
        let update_id = update.update_id;
        let key = format!("update:{update_id}");

        match self.store.set_nx_ex(&key, "1", self.dedup_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(update_id, "Duplicate update, skipping");
                return IngestOutcome::Duplicate;
            }
            Err(error) => {
                // an unreachable store must not stall delivery
                warn!(update_id, %error, "Dedup check failed, processing anyway");
            }
        }

        let event = Event::from_update(update);
        if self.dispatcher.dispatch(event) {
            IngestOutcome::Dispatched
        } else {
            IngestOutcome::Unrouted
        }
    }
}

/// Compares secrets without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}

async fn receive(
    State(state): State<Arc<WebhookState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookRejection> {
    if method != Method::POST {
        return Err(WebhookRejection::MethodNotAllowed);
    }
    state.authenticate(&headers)?;
    state.admit()?;

    let update = decode_update(&body).inspect_err(|error| {
        debug!(%error, len = body.len(), "Rejecting malformed webhook body");
    })?;

    let outcome = state.ingest(update).await;
    trace!(?outcome, "Webhook update accepted");
    Ok(StatusCode::OK)
}

/// HTTP listener that feeds pushed updates into a [`Dispatcher`].
pub struct WebhookServer {
    config: WebhookConfig,
    state: Arc<WebhookState>,
}

impl WebhookServer {
    pub fn new(
        config: WebhookConfig,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn KvStore>,
    ) -> TransportResult<Self> {
        let secret_header = HeaderName::from_bytes(config.secret_header.as_bytes())
            .map_err(|e| TransportError::InvalidConfig(format!("secret header: {e}")))?;

        let state = Arc::new(WebhookState {
            dispatcher,
            store,
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            secret_header,
            limiter: TokenBucket::new(config.rate_limit_per_second, config.rate_limit_burst),
            dedup_ttl: config.dedup_ttl,
        });

        Ok(Self { config, state })
    }

    /// The router serving the webhook path, for embedding or tests.
    pub fn router(&self) -> Router {
        let path = if self.config.path.starts_with('/') {
            self.config.path.clone()
        } else {
            format!("/{}", self.config.path)
        };

        Router::new()
            .route(&path, any(receive))
            .with_state(Arc::clone(&self.state))
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> TransportResult<TcpListener> {
        TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.config.listen.clone(),
                source,
            })
    }

    /// Serves on `listener` until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> TransportResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, path = %self.config.path, "Webhook listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("Webhook stopped");
        Ok(())
    }

    /// Binds and serves until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> TransportResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("listen", &self.config.listen)
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use warden_core::{Bot, MemoryStore, MockCaller, StoreError, StoreResult};
    use warden_framework::{Ctx, ON_TEXT};

    const SECRET: &str = "s3cret";

    fn update_body(update_id: i64) -> String {
        format!(
            r#"{{"update_id":{update_id},"message":{{"message_id":1,
                "chat":{{"id":-100,"type":"supergroup"}},
                "from":{{"id":5,"first_name":"Ann"}},"text":"hello"}}}}"#
        )
    }

    fn counting_dispatcher() -> (Arc<Dispatcher>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let dispatcher = Dispatcher::builder(Bot::new(Arc::new(MockCaller::new())))
            .with_handler(ON_TEXT, move |_ctx: Ctx| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        (dispatcher, hits)
    }

    fn server(config: WebhookConfig, dispatcher: Arc<Dispatcher>, store: Arc<dyn KvStore>) -> Router {
        WebhookServer::new(config, dispatcher, store).unwrap().router()
    }

    fn secured() -> WebhookConfig {
        WebhookConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    fn post(body: impl Into<Body>, secret: Option<&str>) -> Request<Body> {
        let mut request = Request::builder().method("POST").uri("/webhook");
        if let Some(secret) = secret {
            request = request.header(DEFAULT_SECRET_HEADER, secret);
        }
        request.body(body.into()).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_delivery_dispatches_once() {
        let (dispatcher, hits) = counting_dispatcher();
        let router = server(secured(), dispatcher.clone(), Arc::new(MemoryStore::new()));

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(post(update_body(42), Some(SECRET)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        dispatcher.supervisor().wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_order() {
        let (dispatcher, hits) = counting_dispatcher();
        let router = server(secured(), dispatcher, Arc::new(MemoryStore::new()));

        let get = Request::builder()
            .method("GET")
            .uri("/webhook")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = router.clone().oneshot(post("{}", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(post(update_body(1), Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(post("not json", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit() {
        let (dispatcher, _) = counting_dispatcher();
        let config = WebhookConfig {
            rate_limit_per_second: 1.0,
            rate_limit_burst: 2,
            ..Default::default()
        };
        let router = server(config, dispatcher, Arc::new(MemoryStore::new()));

        let mut statuses = Vec::new();
        for id in 0..3 {
            let response = router.clone().oneshot(post(update_body(id), None)).await.unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        let response = router.oneshot(post(update_body(9), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_shared_secret_header_by_default() {
        let (dispatcher, hits) = counting_dispatcher();
        let router = server(secured(), dispatcher.clone(), Arc::new(MemoryStore::new()));

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("X-Shared-Secret", SECRET)
            .body(Body::from(update_body(3)))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        dispatcher.supervisor().wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_rate_limits() {
        let (dispatcher, _) = counting_dispatcher();
        let router = server(WebhookConfig::default(), dispatcher, Arc::new(MemoryStore::new()));

        let mut limited = 0;
        for id in 0..100 {
            let response = router.clone().oneshot(post(update_body(id), None)).await.unwrap();
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                limited += 1;
            }
        }
        assert_eq!(limited, 100 - DEFAULT_RATE_LIMIT_BURST as usize);
    }

    #[tokio::test]
    async fn test_zero_rate_opts_out() {
        let (dispatcher, _) = counting_dispatcher();
        let config = WebhookConfig {
            rate_limit_per_second: 0.0,
            ..Default::default()
        };
        let router = server(config, dispatcher, Arc::new(MemoryStore::new()));

        for id in 0..100 {
            let response = router.clone().oneshot(post(update_body(id), None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_custom_secret_header() {
        let (dispatcher, _) = counting_dispatcher();
        let config = WebhookConfig {
            secret: Some(SECRET.into()),
            secret_header: PLATFORM_SECRET_HEADER.into(),
            ..Default::default()
        };
        let router = server(config, dispatcher, Arc::new(MemoryStore::new()));

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(PLATFORM_SECRET_HEADER, SECRET)
            .body(Body::from(update_body(5)))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // the default header no longer authenticates once another is configured
        let response = router.oneshot(post(update_body(6), Some(SECRET))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn incr(&self, _: &str) -> StoreResult<i64> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let (dispatcher, hits) = counting_dispatcher();
        let router = server(WebhookConfig::default(), dispatcher.clone(), Arc::new(BrokenStore));

        let response = router.oneshot(post(update_body(7), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        dispatcher.supervisor().wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}

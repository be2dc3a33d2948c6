//! # Warden Transport
//!
//! Network edges of the Warden bot engine.
//!
//! | Feature       | Provides                                              |
//! |---------------|-------------------------------------------------------|
//! | `http-client` | [`HttpApiCaller`], the reqwest-backed outbound client |
//! | `http-server` | [`WebhookServer`], the axum webhook adapter           |
//! | `redis-store` | [`RedisStore`], a shared [`KvStore`](warden_core::KvStore) |
//!
//! The long-poll adapter ([`LongPoller`]) and the [`TokenBucket`] are always
//! available.

pub mod error;
pub mod polling;
pub mod rate_limit;

#[cfg(feature = "http-client")]
pub mod http_client;

#[cfg(feature = "http-server")]
pub mod webhook;

#[cfg(feature = "redis-store")]
pub mod redis_store;

pub use error::{TransportError, TransportResult};
pub use polling::{LongPoller, PollingConfig};
pub use rate_limit::TokenBucket;

#[cfg(feature = "http-client")]
pub use http_client::{DEFAULT_API_URL, HttpApiCaller, HttpClientConfig};

#[cfg(feature = "http-server")]
pub use webhook::{
    DEFAULT_DEDUP_TTL, DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_PER_SECOND,
    DEFAULT_SECRET_HEADER, IngestOutcome, PLATFORM_SECRET_HEADER, WebhookConfig,
    WebhookRejection, WebhookServer,
};

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

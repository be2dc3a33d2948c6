//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_transport::{
    DEFAULT_API_URL, DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_PER_SECOND,
    DEFAULT_SECRET_HEADER, HttpClientConfig, PollingConfig, WebhookConfig,
};

/// Store URL used when `store.url` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub bot: BotConfig,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// How updates reach the bot.
    #[serde(default)]
    pub mode: RunMode,

    #[serde(default)]
    pub webhook: WebhookSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Bot & HTTP
// =============================================================================

/// Bot credentials and identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot API token.
    #[serde(default)]
    pub token: String,

    /// Bot API server base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Username used for `/cmd@name` targeting. Overrides what `getMe`
    /// reports.
    #[serde(default)]
    pub username: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
            username: None,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Outbound client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            timeout_ms: default_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// Combines with bot credentials into the transport client config.
    pub fn to_client_config(&self, bot: &BotConfig, buffer_pool_capacity: usize) -> HttpClientConfig {
        HttpClientConfig {
            api_url: bot.api_url.clone(),
            token: bot.token.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            buffer_pool_capacity,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

// =============================================================================
// Ingestion
// =============================================================================

/// Update ingestion mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Polling,
    Webhook,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// Webhook listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Address to bind, `host:port`.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_webhook_path")]
    pub path: String,

    /// Shared secret expected in `secret_header`.
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_secret_header")]
    pub secret_header: String,

    /// Externally reachable URL; when set, `setWebhook` is called on start.
    #[serde(default)]
    pub public_url: Option<String>,

    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_webhook_path(),
            secret: None,
            secret_header: default_secret_header(),
            public_url: None,
            dedup_ttl_secs: default_dedup_ttl_secs(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl WebhookSettings {
    pub fn to_transport(&self) -> WebhookConfig {
        WebhookConfig {
            listen: self.listen.clone(),
            path: self.path.clone(),
            secret: self.secret.clone(),
            secret_header: self.secret_header.clone(),
            dedup_ttl: Duration::from_secs(self.dedup_ttl_secs),
            rate_limit_per_second: self.rate_limit.per_second,
            rate_limit_burst: self.rate_limit.burst,
        }
    }
}

/// Token bucket applied to incoming webhook requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained rate; an explicit `0` opts out of limiting.
    #[serde(default = "default_rate_limit_per_second")]
    pub per_second: f64,

    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_rate_limit_per_second(),
            burst: default_rate_limit_burst(),
        }
    }
}

fn default_rate_limit_per_second() -> f64 {
    DEFAULT_RATE_LIMIT_PER_SECOND
}

fn default_rate_limit_burst() -> u32 {
    DEFAULT_RATE_LIMIT_BURST
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_secret_header() -> String {
    DEFAULT_SECRET_HEADER.to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    3600
}

/// Long-poll settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause after a failed `getUpdates`, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default)]
    pub allowed_updates: Vec<String>,

    #[serde(default)]
    pub drop_pending_updates: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout_secs(),
            retry_interval_ms: default_retry_interval_ms(),
            allowed_updates: Vec::new(),
            drop_pending_updates: false,
        }
    }
}

impl PollingSettings {
    pub fn to_transport(&self) -> PollingConfig {
        PollingConfig {
            timeout_secs: self.timeout_secs,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            allowed_updates: self.allowed_updates.clone(),
            drop_pending_updates: self.drop_pending_updates,
        }
    }
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_interval_ms() -> u64 {
    3000
}

// =============================================================================
// Dispatch, permissions, store
// =============================================================================

/// Pool and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Handler chains allowed to run at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_context_pool_capacity")]
    pub context_pool_capacity: usize,

    /// Idle encode buffers kept by the outbound client.
    #[serde(default = "default_buffer_pool_capacity")]
    pub buffer_pool_capacity: usize,

    /// How long shutdown waits for running handlers.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            context_pool_capacity: default_context_pool_capacity(),
            buffer_pool_capacity: default_buffer_pool_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_max_concurrency() -> usize {
    warden_framework::DEFAULT_MAX_CONCURRENCY
}

fn default_context_pool_capacity() -> usize {
    warden_framework::DEFAULT_CONTEXT_POOL_CAPACITY
}

fn default_buffer_pool_capacity() -> usize {
    64
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// How long an admin lookup is cached.
    #[serde(default = "default_admin_ttl_secs")]
    pub admin_ttl_secs: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            admin_ttl_secs: default_admin_ttl_secs(),
        }
    }
}

impl PermissionsConfig {
    pub fn admin_ttl(&self) -> Duration {
        Duration::from_secs(self.admin_ttl_secs)
    }
}

fn default_admin_ttl_secs() -> u64 {
    warden_core::DEFAULT_ADMIN_TTL.as_secs()
}

/// Key-value store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process; state is lost on restart and not shared between
    /// instances. Only safe when a single instance receives updates.
    Memory,
    /// Redis; requires the `redis-store` feature (on by default).
    #[default]
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for remote backends.
    #[serde(default = "default_store_url")]
    pub url: Option<String>,

    /// How often the memory backend sweeps expired keys.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_store_url() -> Option<String> {
    Some(DEFAULT_REDIS_URL.to_string())
}

fn default_purge_interval_secs() -> u64 {
    60
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// When the log file rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Target file when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `warden_transport = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = WardenConfig::default();
        assert_eq!(config.mode, RunMode::Polling);
        assert_eq!(config.permissions.admin_ttl(), Duration::from_secs(120));
        assert_eq!(config.webhook.to_transport().dedup_ttl, Duration::from_secs(3600));
        assert_eq!(
            config.polling.to_transport().retry_interval,
            Duration::from_secs(3)
        );
        assert_eq!(config.bot.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_shipped_defaults_limit_and_share_state() {
        let config = WardenConfig::default();
        let webhook = config.webhook.to_transport();
        assert_eq!(webhook.secret_header, "X-Shared-Secret");
        assert_eq!(webhook.rate_limit_per_second, 30.0);
        assert_eq!(webhook.rate_limit_burst, 60);

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url.as_deref(), Some(DEFAULT_REDIS_URL));
    }

    #[test]
    fn test_partial_rate_limit_section_keeps_defaults() {
        let settings: WebhookSettings =
            serde_json::from_str(r#"{"rate_limit": {"per_second": 5.0}}"#).unwrap();
        assert_eq!(settings.rate_limit.per_second, 5.0);
        assert_eq!(settings.rate_limit.burst, DEFAULT_RATE_LIMIT_BURST);
    }

    #[test]
    fn test_client_config_carries_credentials() {
        let bot = BotConfig {
            token: "123:abc".into(),
            api_url: "http://localhost:8081".into(),
            username: None,
        };
        let client = HttpConfig::default().to_client_config(&bot, 8);
        assert_eq!(client.token, "123:abc");
        assert_eq!(client.api_url, "http://localhost:8081");
        assert_eq!(client.buffer_pool_capacity, 8);
        assert_eq!(client.timeout, Duration::from_secs(10));
    }
}

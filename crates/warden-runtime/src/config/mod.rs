//! Configuration loading and validation.
//!
//! Settings are layered with figment (defaults, files, `WARDEN_*`
//! environment, programmatic overrides) and checked by [`validate_config`]
//! before anything starts.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile};
pub use schema::{
    BotConfig, DEFAULT_REDIS_URL, DispatchConfig, HttpConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, PermissionsConfig, PollingSettings, RateLimitConfig, RunMode, SpanEventConfig,
    StoreBackend, StoreConfig, WardenConfig, WebhookSettings,
};
pub use validation::validate_config;

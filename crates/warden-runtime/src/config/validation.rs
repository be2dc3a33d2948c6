//! Configuration validation utilities.

use std::net::SocketAddr;

use tracing::warn;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    DispatchConfig, PollingSettings, RunMode, StoreBackend, StoreConfig, WardenConfig,
    WebhookSettings,
};

/// Validates the entire configuration.
pub fn validate_config(config: &WardenConfig) -> ConfigResult<()> {
    if config.bot.token.trim().is_empty() {
        return Err(ConfigError::missing_field("bot.token"));
    }
    validate_url(&config.bot.api_url, &["http://", "https://"])?;

    if config.http.timeout_ms == 0 || config.http.connect_timeout_ms == 0 {
        return Err(ConfigError::validation("HTTP timeouts must be greater than 0"));
    }

    match config.mode {
        RunMode::Webhook => validate_webhook(&config.webhook)?,
        RunMode::Polling => validate_polling(&config.polling)?,
    }

    validate_dispatch(&config.dispatch)?;

    if config.permissions.admin_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "permissions.admin_ttl_secs must be greater than 0",
        ));
    }

    validate_store(&config.store)?;
    if config.mode == RunMode::Webhook && config.store.backend == StoreBackend::Memory {
        warn!(
            "store.backend = \"memory\" keeps dedup and admin state per process; \
             run a single webhook instance or switch to redis"
        );
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookSettings) -> ConfigResult<()> {
    webhook
        .listen
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::InvalidAddress(webhook.listen.clone()))?;

    if !webhook.path.starts_with('/') {
        return Err(ConfigError::validation("webhook.path must start with '/'"));
    }

    if webhook.secret_header.trim().is_empty() {
        return Err(ConfigError::missing_field("webhook.secret_header"));
    }

    // the platform only echoes secrets of this shape
    if let Some(secret) = webhook.secret.as_deref().filter(|s| !s.is_empty()) {
        let well_formed = secret.len() <= 256
            && secret
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !well_formed {
            return Err(ConfigError::validation(
                "webhook.secret must be 1-256 characters of A-Z, a-z, 0-9, '_' or '-'",
            ));
        }
    }

    if let Some(url) = &webhook.public_url {
        validate_url(url, &["https://", "http://"])?;
    }

    if webhook.dedup_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "webhook.dedup_ttl_secs must be greater than 0",
        ));
    }

    let limit = &webhook.rate_limit;
    if !limit.per_second.is_finite() || limit.per_second < 0.0 {
        return Err(ConfigError::validation(
            "webhook.rate_limit.per_second must be a non-negative number",
        ));
    }
    if limit.per_second > 0.0 && limit.burst == 0 {
        return Err(ConfigError::validation(
            "webhook.rate_limit.burst must be at least 1 when rate limiting is enabled",
        ));
    }

    Ok(())
}

fn validate_polling(polling: &PollingSettings) -> ConfigResult<()> {
    if polling.retry_interval_ms == 0 {
        return Err(ConfigError::validation(
            "polling.retry_interval_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.max_concurrency == 0 {
        return Err(ConfigError::validation(
            "dispatch.max_concurrency must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_store(store: &StoreConfig) -> ConfigResult<()> {
    if store.backend == StoreBackend::Redis {
        let url = store
            .url
            .as_deref()
            .ok_or_else(|| ConfigError::missing_field("store.url"))?;
        validate_url(url, &["redis://", "rediss://"])?;
    }
    Ok(())
}

fn validate_url(url: &str, schemes: &[&str]) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }
    if !schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {schemes:?}"),
        ));
    }
    Ok(())
}

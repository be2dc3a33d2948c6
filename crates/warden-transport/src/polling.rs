//! Long-poll adapter.
//!
//! On start the adapter removes any registered webhook and resolves the bot's
//! identity; failing to learn who the bot is aborts startup, since command
//! targeting depends on it. It then loops on `getUpdates`.
//!
//! # Delivery guarantee
//!
//! The cursor moves past an update *before* that update is dispatched, and
//! dispatch does not wait for the handler. The next `getUpdates` therefore
//! acknowledges updates whose handlers may still be running or may later
//! fail: delivery on this path is at-most-once. A failed `getUpdates` keeps
//! the cursor and retries after a fixed interval, forever.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_core::{ApiResult, Bot, BotIdentity, Event, Update};
use warden_framework::Dispatcher;

/// Long-poll settings.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Server-side wait per `getUpdates`, in seconds.
    pub timeout_secs: u64,
    /// Pause after a failed `getUpdates`.
    pub retry_interval: Duration,
    /// Update kinds to request; empty means the platform default.
    pub allowed_updates: Vec<String>,
    /// Discard updates queued while the bot was offline.
    pub drop_pending_updates: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_interval: Duration::from_secs(3),
            allowed_updates: Vec::new(),
            drop_pending_updates: false,
        }
    }
}

/// Pulls updates with `getUpdates` and feeds them to a [`Dispatcher`].
pub struct LongPoller {
    bot: Bot,
    dispatcher: Arc<Dispatcher>,
    config: PollingConfig,
    cursor: i64,
}

impl LongPoller {
    pub fn new(dispatcher: Arc<Dispatcher>, config: PollingConfig) -> Self {
        Self {
            bot: dispatcher.bot().clone(),
            dispatcher,
            config,
            cursor: 0,
        }
    }

    /// Lowest `update_id` not yet acknowledged.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Removes any webhook and resolves the bot identity.
    ///
    /// A username already set on the bot (from configuration) is kept.
    pub async fn start(&self) -> ApiResult<BotIdentity> {
        if let Err(error) = self
            .bot
            .delete_webhook(self.config.drop_pending_updates)
            .await
        {
            warn!(%error, "deleteWebhook failed, continuing");
        }

        let mut identity = self.bot.get_me().await?;
        if let Some(configured) = self.bot.username() {
            identity.username = Some(configured);
        }
        self.bot.set_identity(identity.clone());

        info!(
            id = identity.id,
            username = identity.username.as_deref().unwrap_or_default(),
            "Long polling as bot"
        );
        Ok(identity)
    }

    /// Runs one `getUpdates` round and dispatches the batch.
    ///
    /// Returns how many updates were received.
    pub async fn poll_once(&mut self) -> ApiResult<usize> {
        let updates = self
            .bot
            .get_updates(
                self.cursor,
                self.config.timeout_secs,
                &self.config.allowed_updates,
            )
            .await?;

        let received = updates.len();
        for raw in updates {
            self.accept(raw);
        }
        Ok(received)
    }

    fn accept(&mut self, raw: Value) {
        let Some(update_id) = raw.get("update_id").and_then(Value::as_i64) else {
            warn!("Update without update_id, skipping");
            return;
        };
        if update_id >= self.cursor {
            self.cursor = update_id + 1;
        }

        match serde_json::from_value::<Update>(raw) {
            Ok(update) => {
                self.dispatcher.dispatch(Event::from_update(update));
            }
            Err(error) => warn!(update_id, %error, "Malformed update, skipping"),
        }
    }

    /// Starts, then polls until `shutdown` is cancelled.
    ///
    /// Only startup errors are returned.
    pub async fn run(mut self, shutdown: CancellationToken) -> ApiResult<()> {
        self.start().await?;

        loop {
            let round = tokio::select! {
                _ = shutdown.cancelled() => break,
                round = self.poll_once() => round,
            };

            match round {
                Ok(received) => {
                    if received > 0 {
                        debug!(received, cursor = self.cursor, "Polled updates");
                    }
                }
                Err(error) => {
                    warn!(
                        %error,
                        cursor = self.cursor,
                        retry_in = ?self.config.retry_interval,
                        "getUpdates failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_interval) => {}
                    }
                }
            }
        }

        info!(cursor = self.cursor, "Long polling stopped");
        Ok(())
    }
}

impl std::fmt::Debug for LongPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongPoller")
            .field("cursor", &self.cursor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Process orchestration: configuration to a running adapter.
//!
//! The runtime owns everything handlers share (the [`Bot`], the store, the
//! [`PermissionCache`]) and the mutable [`DispatcherBuilder`]. [`run`]
//! freezes the registry, starts the adapter chosen by `mode`, and on
//! shutdown stops intake first, then waits for in-flight handlers.
//!
//! ```rust,ignore
//! let mut runtime = WardenRuntime::builder().profile("production").build().await?;
//! runtime.register("/ping", |ctx: Ctx| async move { ctx.reply("pong").await.map(|_| ()) });
//! runtime.run().await?;
//! ```
//!
//! [`run`]: WardenRuntime::run

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::{debug, error, info, warn};

use warden_core::{
    ApiCaller, Bot, BotIdentity, MemoryStore, PermissionCache, SharedStore,
};
use warden_framework::{
    BoxError, BoxedService, Ctx, Dispatcher, DispatcherBuilder, Handler, TaskSupervisor,
};
use warden_transport::{HttpApiCaller, LongPoller, WebhookServer};

use crate::config::{
    ConfigError, ConfigLoader, RunMode, StoreBackend, StoreConfig, WardenConfig, WebhookSettings,
    validate_config,
};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A configured bot, ready to register handlers and run.
pub struct WardenRuntime {
    config: WardenConfig,
    bot: Bot,
    store: SharedStore,
    /// Set when the store is in-process and needs sweeping.
    memory: Option<Arc<MemoryStore>>,
    permissions: PermissionCache,
    dispatcher: DispatcherBuilder,
    shutdown: CancellationToken,
}

impl WardenRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Initializes logging, validates `config`, then builds the outbound
    /// client and connects the store.
    pub async fn from_config(config: WardenConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        validate_config(&config)?;

        let client_config = config
            .http
            .to_client_config(&config.bot, config.dispatch.buffer_pool_capacity);
        let caller = HttpApiCaller::new(&client_config)?;

        let (store, memory) = connect_store(&config.store).await?;

        info!(
            mode = %config.mode,
            store = ?config.store.backend,
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );

        let mut runtime = Self::from_parts(config, Arc::new(caller), store);
        runtime.memory = memory;
        Ok(runtime)
    }

    /// Assembles a runtime from an already built caller and store.
    ///
    /// Skips logging setup and validation.
    pub fn from_parts(config: WardenConfig, caller: Arc<dyn ApiCaller>, store: SharedStore) -> Self {
        let bot = Bot::new(caller);
        if let Some(username) = &config.bot.username {
            bot.set_identity(BotIdentity {
                username: Some(username.clone()),
                ..Default::default()
            });
        }

        let permissions = PermissionCache::new(Arc::clone(&store), bot.clone())
            .with_ttl(config.permissions.admin_ttl());

        let dispatcher = Dispatcher::builder(bot.clone())
            .context_pool_capacity(config.dispatch.context_pool_capacity)
            .supervisor(TaskSupervisor::new(config.dispatch.max_concurrency));

        Self {
            config,
            bot,
            store,
            memory: None,
            permissions,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Admin lookup sharing the runtime's store and TTL.
    pub fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    /// Cancelling this token stops the runtime as a signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The registry being built, for anything not covered by
    /// [`register`](Self::register) and [`layer`](Self::layer).
    pub fn dispatcher_mut(&mut self) -> &mut DispatcherBuilder {
        &mut self.dispatcher
    }

    pub fn register<H: Handler>(&mut self, key: impl Into<String>, handler: H) -> &mut Self {
        self.dispatcher.register(key, handler);
        self
    }

    /// Appends a middleware layer; the first one added runs outermost.
    pub fn layer<L>(&mut self, layer: L) -> &mut Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Ctx, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Ctx>>::Future: Send + 'static,
    {
        self.dispatcher.layer(layer);
        self
    }

    /// Runs until Ctrl+C, SIGTERM or the shutdown token.
    pub async fn run(self) -> RuntimeResult<()> {
        info!("Warden runtime is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes or the shutdown token is cancelled.
    ///
    /// Returns the adapter's error if it failed to start or stopped on its
    /// own.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            store,
            memory,
            dispatcher,
            shutdown: token,
            ..
        } = self;

        let dispatcher = dispatcher.build();
        if let Some(memory) = memory {
            let interval = Duration::from_secs(config.store.purge_interval_secs.max(1));
            tokio::spawn(purge_loop(memory, interval, token.clone()));
        }

        let adapter = serve_updates(&config, store, Arc::clone(&dispatcher), token.clone());
        tokio::pin!(adapter);

        let result = tokio::select! {
            result = &mut adapter => result,
            () = shutdown => {
                debug!("Shutdown requested, stopping adapter");
                token.cancel();
                adapter.await
            }
        };
        token.cancel();

        if let Err(error) = &result {
            error!(%error, "Adapter stopped with an error");
        }

        let grace = config.dispatch.shutdown_grace();
        let drained = dispatcher.supervisor().shutdown(grace).await;
        let stats = dispatcher.supervisor().stats();
        info!(
            drained,
            completed = stats.completed,
            failed = stats.failed,
            faulted = stats.faulted,
            "Runtime stopped"
        );

        result
    }
}

impl std::fmt::Debug for WardenRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenRuntime")
            .field("mode", &self.config.mode)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

async fn connect_store(
    config: &StoreConfig,
) -> RuntimeResult<(SharedStore, Option<Arc<MemoryStore>>)> {
    match config.backend {
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new());
            let shared: SharedStore = memory.clone();
            Ok((shared, Some(memory)))
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| ConfigError::missing_field("store.url"))?;
            let redis = warden_transport::RedisStore::connect(url).await?;
            Ok((Arc::new(redis), None))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => Err(ConfigError::validation(
            "store.backend = \"redis\" requires the redis-store feature",
        )
        .into()),
    }
}

async fn purge_loop(store: Arc<MemoryStore>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => store.purge_expired(),
        }
    }
}

async fn serve_updates(
    config: &WardenConfig,
    store: SharedStore,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> RuntimeResult<()> {
    match config.mode {
        RunMode::Polling => LongPoller::new(dispatcher, config.polling.to_transport())
            .run(shutdown)
            .await
            .map_err(RuntimeError::Identity),
        RunMode::Webhook => {
            let bot = dispatcher.bot().clone();
            resolve_identity(&bot).await;
            register_webhook(&bot, &config.webhook).await;

            WebhookServer::new(config.webhook.to_transport(), dispatcher, store)?
                .run(shutdown)
                .await?;
            Ok(())
        }
    }
}

/// Asks `getMe` who the bot is; a configured username is kept.
///
/// Failure is tolerated: commands are then accepted only when untargeted or
/// addressed to the configured username.
async fn resolve_identity(bot: &Bot) {
    match bot.get_me().await {
        Ok(mut identity) => {
            if let Some(configured) = bot.username() {
                identity.username = Some(configured);
            }
            info!(
                id = identity.id,
                username = identity.username.as_deref().unwrap_or_default(),
                "Resolved bot identity"
            );
            bot.set_identity(identity);
        }
        Err(error) => warn!(
            %error,
            configured = bot.username().as_deref().unwrap_or_default(),
            "getMe failed, command targeting limited to the configured username"
        ),
    }
}

async fn register_webhook(bot: &Bot, webhook: &WebhookSettings) {
    let Some(url) = webhook.public_url.as_deref() else {
        return;
    };
    let secret = webhook.secret.as_deref().filter(|s| !s.is_empty());
    if secret.is_some()
        && !webhook
            .secret_header
            .eq_ignore_ascii_case(warden_transport::PLATFORM_SECRET_HEADER)
    {
        warn!(
            header = %webhook.secret_header,
            "The platform sends the registered secret in {}; set webhook.secret_header to match",
            warden_transport::PLATFORM_SECRET_HEADER
        );
    }
    match bot.set_webhook(url, secret, &[]).await {
        Ok(()) => info!(url, "Webhook registered"),
        Err(error) => warn!(%error, url, "setWebhook failed, continuing"),
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(error) => warn!(%error, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(error) => error!(%error, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads configuration and builds a [`WardenRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Forces the ingestion mode regardless of configuration.
    pub fn mode(mut self, mode: RunMode) -> Self {
        self.config_loader = self.config_loader.set("mode", mode);
        self
    }

    pub fn merge(mut self, config: WardenConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub async fn build(self) -> RuntimeResult<WardenRuntime> {
        let config = self.config_loader.extract()?;
        WardenRuntime::from_config(config).await
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

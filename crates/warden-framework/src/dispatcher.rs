//! Dispatch registry.
//!
//! Handlers are registered under string keys during setup; middleware is
//! appended to one global chain. [`DispatcherBuilder::build`] composes every
//! handler with the chain once and freezes the result into an immutable
//! [`Dispatcher`], so the hot path takes no locks.
//!
//! # Routing
//!
//! | event              | keys tried, in order                                  |
//! |--------------------|-------------------------------------------------------|
//! | command message    | `/cmd`, [`ON_UNKNOWN_COMMAND`], [`ON_TEXT`]           |
//! | plain text message | [`ON_TEXT`]                                           |
//! | members joined     | [`NEW_CHAT_MEMBERS`]                                  |
//! | member left        | [`LEFT_CHAT_MEMBER`]                                  |
//! | callback query     | full data, then the route before `|`                  |
//!
//! A command addressed to a different bot (`/ban@OtherBot`) is dropped before
//! any lookup. The first matching key wins; no match is a silent no-op.
//!
//! # Middleware order
//!
//! The first middleware registered is the outermost: with `[m1, m2]` a
//! dispatch runs `m1 → m2 → handler → m2 → m1`.

use std::collections::HashMap;
use std::sync::Arc;

use tower::{BoxError, Layer, Service, ServiceExt};
use tracing::{Instrument, Span, debug, debug_span, trace};

use warden_core::{Bot, CALLBACK_DELIMITER, Event, EventKind, Pool};

use crate::context::{Ctx, DispatchContext};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{BoxedService, Handler, into_service};
use crate::middleware::{BoxedLayer, boxed_layer};
use crate::supervisor::{TaskSupervisor, run_guarded};

/// Pseudo-key for membership-joined events.
pub const NEW_CHAT_MEMBERS: &str = "new_chat_members";
/// Pseudo-key for membership-left events.
pub const LEFT_CHAT_MEMBER: &str = "left_chat_member";
/// Pseudo-key for commands with no registered handler.
pub const ON_UNKNOWN_COMMAND: &str = "on_unknown_command";
/// Pseudo-key for any non-empty message text.
pub const ON_TEXT: &str = "on_text";

/// Default number of idle contexts the pool keeps.
pub const DEFAULT_CONTEXT_POOL_CAPACITY: usize = 128;

// =============================================================================
// DispatcherBuilder
// =============================================================================

/// Mutable registration phase of a [`Dispatcher`].
pub struct DispatcherBuilder {
    bot: Bot,
    handlers: HashMap<String, BoxedService>,
    layers: Vec<BoxedLayer>,
    pool_capacity: usize,
    supervisor: Option<TaskSupervisor>,
}

impl DispatcherBuilder {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            handlers: HashMap::new(),
            layers: Vec::new(),
            pool_capacity: DEFAULT_CONTEXT_POOL_CAPACITY,
            supervisor: None,
        }
    }

    /// Associates `handler` with `key`, replacing any earlier association.
    ///
    /// Keys are command tokens (`"/ban"`), exact callback data or callback
    /// routes (`"conn_connect"`), or one of the pseudo-keys.
    pub fn register<H: Handler>(&mut self, key: impl Into<String>, handler: H) -> &mut Self {
        self.register_service(key, into_service(handler))
    }

    /// Like [`register`](Self::register), for an already composed service.
    pub fn register_service(&mut self, key: impl Into<String>, service: BoxedService) -> &mut Self {
        let key = key.into();
        if self.handlers.insert(key.clone(), service).is_some() {
            debug!(%key, "Handler replaced");
        }
        self
    }

    /// Appends a middleware layer. Earlier layers wrap later ones.
    pub fn layer<L>(&mut self, layer: L) -> &mut Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Ctx, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Ctx>>::Future: Send + 'static,
    {
        self.layers.push(boxed_layer(layer));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_handler<H: Handler>(mut self, key: impl Into<String>, handler: H) -> Self {
        self.register(key, handler);
        self
    }

    /// Builder-style [`layer`](Self::layer).
    pub fn with_layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Ctx, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Ctx>>::Future: Send + 'static,
    {
        self.layer(layer);
        self
    }

    /// Sets how many idle contexts the pool retains.
    pub fn context_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Runs dispatched chains on `supervisor` instead of a default one.
    pub fn supervisor(mut self, supervisor: TaskSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Composes every handler with the middleware chain and freezes the
    /// registry.
    pub fn build(self) -> Arc<Dispatcher> {
        let layers = self.layers;
        let routes = self
            .handlers
            .into_iter()
            .map(|(key, handler)| {
                let composed = layers.iter().rev().fold(handler, |svc, layer| layer(svc));
                (key, composed)
            })
            .collect::<HashMap<_, _>>();

        let bot = self.bot.clone();
        let contexts = Pool::new(self.pool_capacity, move || DispatchContext::new(bot.clone()));

        debug!(
            handlers = routes.len(),
            middleware = layers.len(),
            "Dispatcher built"
        );

        Arc::new(Dispatcher {
            bot: self.bot,
            routes,
            contexts,
            supervisor: self.supervisor.unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("handlers", &self.handlers.len())
            .field("middleware", &self.layers.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// A resolved route: the key that matched, its composed service, and the
/// arguments to hand over.
struct Route<'a> {
    key: &'a str,
    service: &'a BoxedService,
    args: Vec<String>,
}

/// Immutable registry mapping events to composed handler chains.
pub struct Dispatcher {
    bot: Bot,
    routes: HashMap<String, BoxedService>,
    contexts: Pool<DispatchContext>,
    supervisor: TaskSupervisor,
}

impl Dispatcher {
    pub fn builder(bot: Bot) -> DispatcherBuilder {
        DispatcherBuilder::new(bot)
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    /// The context pool, for accounting.
    pub fn contexts(&self) -> &Pool<DispatchContext> {
        &self.contexts
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    fn lookup<'a>(&'a self, key: &str, args: Vec<String>) -> Option<Route<'a>> {
        self.routes
            .get_key_value(key)
            .map(|(key, service)| Route { key, service, args })
    }

    fn resolve(&self, event: &Event) -> Option<Route<'_>> {
        match &event.kind {
            EventKind::Message { command: Some(command), .. } => {
                let username = self.bot.username();
                if !command.is_addressed_to(username.as_deref()) {
                    trace!(
                        command = %command.name,
                        addressed_to = ?command.target,
                        "Command addressed to another bot, dropping"
                    );
                    return None;
                }
                self.lookup(&command.name, command.args.clone())
                    .or_else(|| self.lookup(ON_UNKNOWN_COMMAND, command.args.clone()))
                    .or_else(|| self.lookup(ON_TEXT, command.args.clone()))
            }
            EventKind::Message { .. } if !event.text().is_empty() => {
                self.lookup(ON_TEXT, Vec::new())
            }
            EventKind::Message { .. } => None,
            EventKind::MembersJoined { .. } => self.lookup(NEW_CHAT_MEMBERS, Vec::new()),
            EventKind::MemberLeft { .. } => self.lookup(LEFT_CHAT_MEMBER, Vec::new()),
            EventKind::Callback(callback) => {
                let data = callback.data.as_str();
                self.lookup(data, Vec::new()).or_else(|| {
                    let (route, rest) = data.split_once(CALLBACK_DELIMITER)?;
                    let args = rest.split(CALLBACK_DELIMITER).map(str::to_string).collect();
                    self.lookup(route, args)
                })
            }
            EventKind::Other => None,
        }
    }

    /// Routes `event` and returns the composed chain with its context, ready
    /// to run.
    fn prepare(&self, event: Event) -> Option<(String, Span, BoxedService, Ctx)> {
        let Route { key, service, args } = self.resolve(&event)?;
        let key = key.to_string();
        let service = service.clone();

        let span = debug_span!(
            "dispatch",
            update_id = event.update_id,
            kind = event.kind_name(),
            key = %key,
        );

        let mut ctx = self.contexts.acquire();
        ctx.populate(event, &key, args);
        Some((key, span, service, Arc::new(ctx)))
    }

    /// Dispatches `event` on the supervisor without waiting for it.
    ///
    /// Returns whether a handler was found.
    pub fn dispatch(&self, event: Event) -> bool {
        let update_id = event.update_id;
        let Some((key, span, service, ctx)) = self.prepare(event) else {
            trace!(update_id, "No handler matched");
            return false;
        };

        let route = key.clone();
        self.supervisor.spawn(key, span, async move {
            service
                .oneshot(ctx)
                .await
                .map_err(|source| DispatchError::Handler { route, source })
        });
        true
    }

    /// Runs `event` to completion on the current task.
    ///
    /// Returns `Ok(false)` when no handler matched. Panics are caught and
    /// reported as [`DispatchError::HandlerFault`].
    pub async fn handle(&self, event: Event) -> DispatchResult<bool> {
        let Some((key, span, service, ctx)) = self.prepare(event) else {
            return Ok(false);
        };

        let chain = async {
            service
                .oneshot(ctx)
                .await
                .map_err(|source| DispatchError::Handler {
                    route: key.clone(),
                    source,
                })
        };
        run_guarded(&key, chain)
            .instrument(span)
            .await
            .map(|()| true)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Next, middleware_fn};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warden_core::{BotIdentity, KvStore, MemoryStore, MockCaller, parse_update};

    fn bot_named(username: &str) -> Bot {
        let bot = Bot::new(Arc::new(MockCaller::new()));
        bot.set_identity(BotIdentity {
            id: 1,
            first_name: "Warden".into(),
            username: Some(username.into()),
        });
        bot
    }

    fn text_event(update_id: i64, text: &str) -> Event {
        let raw = format!(
            r#"{{"update_id":{update_id},"message":{{"message_id":10,
                "chat":{{"id":-100,"type":"supergroup"}},
                "from":{{"id":5,"first_name":"Ann"}},"text":{text:?}}}}}"#
        );
        parse_update(raw.as_bytes()).unwrap()
    }

    fn callback_event(data: &str) -> Event {
        let raw = format!(
            r#"{{"update_id":3,"callback_query":{{"id":"cb","from":{{"id":5,"first_name":"Ann"}},
                "message":{{"message_id":11,"chat":{{"id":-100,"type":"supergroup"}}}},
                "data":{data:?}}}}}"#
        );
        parse_update(raw.as_bytes()).unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> impl Handler {
        let log = log.clone();
        move |ctx: Ctx| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{label}:{}", ctx.args().join(",")));
            }
        }
    }

    fn add_tracing(builder: &mut DispatcherBuilder, log: &Arc<Mutex<Vec<String>>>, label: &'static str) {
        let log = log.clone();
        builder.layer(middleware_fn(move |ctx: Ctx, next: Next| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{label}:before"));
                let result = next.run(ctx).await;
                log.lock().push(format!("{label}:after"));
                result
            }
        }));
    }

    async fn explode(_ctx: Ctx) {
        panic!("handler exploded");
    }

    #[tokio::test]
    async fn test_middleware_wraps_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder.register("/ban", recorder(&log, "ban"));
        add_tracing(&mut builder, &log, "m1");
        add_tracing(&mut builder, &log, "m2");
        let dispatcher = builder.build();

        assert!(dispatcher.handle(text_event(1, "/ban 42 spam")).await.unwrap());
        assert_eq!(
            *log.lock(),
            vec!["m1:before", "m2:before", "ban:42,spam", "m2:after", "m1:after"]
        );
    }

    #[tokio::test]
    async fn test_exactly_once_via_supervisor() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let dispatcher = Dispatcher::builder(bot_named("MyBot"))
            .with_handler("/ping", move |_ctx: Ctx| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();

        assert!(dispatcher.dispatch(text_event(1, "/ping")));
        dispatcher.supervisor().wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.contexts().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register("/ban", recorder(&log, "first"))
            .register("/ban", recorder(&log, "second"));
        let dispatcher = builder.build();

        dispatcher.handle(text_event(1, "/ban")).await.unwrap();
        assert_eq!(*log.lock(), vec!["second:"]);
    }

    #[tokio::test]
    async fn test_command_for_other_bot_is_dropped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register("/ban", recorder(&log, "ban"))
            .register(ON_UNKNOWN_COMMAND, recorder(&log, "unknown"))
            .register(ON_TEXT, recorder(&log, "text"));
        let dispatcher = builder.build();

        assert!(!dispatcher.handle(text_event(1, "/ban@OtherBot extra")).await.unwrap());
        assert!(log.lock().is_empty());

        assert!(dispatcher.handle(text_event(2, "/ban@MyBot extra")).await.unwrap());
        assert_eq!(*log.lock(), vec!["ban:extra"]);
    }

    #[tokio::test]
    async fn test_text_fallbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder.register(ON_TEXT, recorder(&log, "text"));
        let dispatcher = builder.build();

        // unknown command falls through to on_text when no catch-all exists
        dispatcher.handle(text_event(1, "/nope a")).await.unwrap();
        dispatcher.handle(text_event(2, "hello there")).await.unwrap();
        assert_eq!(*log.lock(), vec!["text:a", "text:"]);

        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register(ON_UNKNOWN_COMMAND, recorder(&log, "unknown"))
            .register(ON_TEXT, recorder(&log, "text"));
        let dispatcher = builder.build();
        dispatcher.handle(text_event(3, "/nope b")).await.unwrap();
        assert_eq!(log.lock().last().map(String::as_str), Some("unknown:b"));
    }

    #[tokio::test]
    async fn test_callback_prefix_routing_keeps_full_data() {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let dispatcher = Dispatcher::builder(bot_named("MyBot"))
            .with_handler("conn_connect", move |ctx: Ctx| {
                let slot = slot.clone();
                async move {
                    *slot.lock() = Some((ctx.data().to_string(), ctx.args().to_vec()));
                }
            })
            .build();

        assert!(dispatcher.handle(callback_event("conn_connect|123")).await.unwrap());
        assert_eq!(
            seen.lock().clone(),
            Some(("conn_connect|123".to_string(), vec!["123".to_string()]))
        );
        assert!(!dispatcher.handle(callback_event("conn_other|1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exact_callback_beats_prefix() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register("menu|close", recorder(&log, "exact"))
            .register("menu", recorder(&log, "prefix"));
        let dispatcher = builder.build();

        dispatcher.handle(callback_event("menu|close")).await.unwrap();
        dispatcher.handle(callback_event("menu|open|2")).await.unwrap();
        assert_eq!(*log.lock(), vec!["exact:", "prefix:open,2"]);
    }

    #[tokio::test]
    async fn test_membership_pseudo_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register(NEW_CHAT_MEMBERS, recorder(&log, "joined"))
            .register(LEFT_CHAT_MEMBER, recorder(&log, "left"));
        let dispatcher = builder.build();

        let joined = parse_update(
            br#"{"update_id":1,"message":{"message_id":2,"chat":{"id":3,"type":"group"},
                "new_chat_members":[{"id":10,"first_name":"A"}]}}"#,
        )
        .unwrap();
        let left = parse_update(
            br#"{"update_id":2,"message":{"message_id":3,"chat":{"id":3,"type":"group"},
                "left_chat_member":{"id":10,"first_name":"A"}}}"#,
        )
        .unwrap();

        dispatcher.handle(joined).await.unwrap();
        dispatcher.handle(left).await.unwrap();
        assert_eq!(*log.lock(), vec!["joined:", "left:"]);
    }

    #[tokio::test]
    async fn test_middleware_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register("/ban", recorder(&log, "ban"))
            .layer(middleware_fn(|ctx: Ctx, next: Next| async move {
                if ctx.sender().is_some_and(|user| user.id == 5) {
                    return Ok(());
                }
                next.run(ctx).await
            }));
        let dispatcher = builder.build();

        assert!(dispatcher.handle(text_event(1, "/ban")).await.unwrap());
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_counter_middleware() {
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let counters = store.clone();
        let mut builder = Dispatcher::builder(bot_named("MyBot"));
        builder
            .register(ON_TEXT, recorder(&log, "text"))
            .layer(middleware_fn(move |ctx: Ctx, next: Next| {
                let counters = counters.clone();
                async move {
                    let (Some(chat), Some(user)) = (ctx.chat_id(), ctx.sender().map(|u| u.id))
                    else {
                        return next.run(ctx).await;
                    };
                    let key = format!("flood:{chat}:{user}");
                    let count = counters.incr(&key).await?;
                    if count == 1 {
                        counters.expire(&key, Duration::from_secs(10)).await?;
                    }
                    if count > 3 {
                        return Ok(());
                    }
                    next.run(ctx).await
                }
            }));
        let dispatcher = builder.build();

        for id in 0..5 {
            dispatcher.handle(text_event(id, "spam")).await.unwrap();
        }
        assert_eq!(log.lock().len(), 3);

        tokio::time::advance(Duration::from_secs(11)).await;
        dispatcher.handle(text_event(9, "calm")).await.unwrap();
        assert_eq!(log.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_handlers_release_contexts() {
        let dispatcher = Dispatcher::builder(bot_named("MyBot"))
            .with_handler("/boom", explode)
            .with_handler("/ok", |_ctx: Ctx| async move {})
            .context_pool_capacity(8)
            .build();

        for id in 0..20 {
            let text = if id % 2 == 0 { "/boom" } else { "/ok" };
            assert!(dispatcher.dispatch(text_event(id, text)));
        }
        dispatcher.supervisor().wait_idle().await;

        let stats = dispatcher.supervisor().stats();
        assert_eq!(stats.faulted, 10);
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(dispatcher.contexts().outstanding(), 0);
        assert!(dispatcher.contexts().idle() <= 8);
    }

    #[tokio::test]
    async fn test_handle_reports_fault() {
        let dispatcher = Dispatcher::builder(bot_named("MyBot"))
            .with_handler("/boom", explode)
            .build();

        let err = dispatcher.handle(text_event(1, "/boom")).await.unwrap_err();
        assert!(err.is_fault());
        assert_eq!(err.route(), "/boom");
        assert_eq!(dispatcher.contexts().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_surfaces() {
        let dispatcher = Dispatcher::builder(bot_named("MyBot"))
            .with_handler("/fail", |ctx: Ctx| async move {
                ctx.respond(None).await?;
                Ok::<_, warden_core::ApiError>(())
            })
            .build();

        let err = dispatcher.handle(text_event(1, "/fail")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
    }
}

//! # Warden Framework
//!
//! The dispatch layer of the Warden bot engine.
//!
//! This layer provides:
//! - [`DispatchContext`], the pooled per-event context handlers receive
//! - the [`Handler`] trait, implemented for plain `async fn(Ctx)`
//! - middleware as tower layers, with [`middleware_fn`] for closures
//! - the [`Dispatcher`] registry and its routing rules
//! - [`TaskSupervisor`], which runs each dispatch as a bounded, panic-isolated
//!   task
//!
//! ```rust,ignore
//! let mut builder = Dispatcher::builder(bot);
//! builder
//!     .register("/ping", |ctx: Ctx| async move { ctx.reply("pong").await.map(|_| ()) })
//!     .layer(middleware_fn(|ctx: Ctx, next: Next| async move { next.run(ctx).await }));
//! let dispatcher = builder.build();
//! dispatcher.dispatch(event);
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod supervisor;

pub use context::{Ctx, DispatchContext};
pub use dispatcher::{
    DEFAULT_CONTEXT_POOL_CAPACITY, Dispatcher, DispatcherBuilder, LEFT_CHAT_MEMBER,
    NEW_CHAT_MEMBERS, ON_TEXT, ON_UNKNOWN_COMMAND,
};
pub use error::{DispatchError, DispatchResult};
pub use handler::{BoxedService, Handler, HandlerOutput, HandlerService, into_service};
pub use middleware::{FnLayer, FnService, Next, middleware_fn};
pub use supervisor::{DEFAULT_MAX_CONCURRENCY, SupervisorStats, TaskSupervisor};

pub use tower::BoxError;

//! # Warden
//!
//! Update ingestion and dispatch engine for chat-platform bots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────────────────┐
//! │ LongPoller   │──▶│             │──▶│ middleware ─▶ handler("/ban") │──▶ Bot API
//! │ WebhookServer│──▶│ Dispatcher  │──▶│ middleware ─▶ handler(...)    │
//! └──────────────┘   └─────────────┘   └──────────────────────────────┘
//!    dedup, auth,       route by key,      own task, pooled context,
//!    rate limit         supervise          PermissionCache, KvStore
//! ```
//!
//! - **Runtime**: loads configuration, picks the adapter, handles shutdown
//! - **Adapters**: long polling (at-most-once) or webhook (deduplicated)
//! - **Dispatcher**: maps commands, callback data and pseudo-keys to handlers
//! - **Middleware**: tower layers; the first registered runs outermost
//! - **Handlers**: `async fn(Ctx)` returning `()` or a `Result`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warden::prelude::*;
//!
//! async fn ping(ctx: Ctx) -> Result<(), ApiError> {
//!     ctx.reply("pong").await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = WardenRuntime::builder().build().await?;
//!     runtime.register("/ping", ping);
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default) / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `redis-store`: Redis-backed [`KvStore`](core::KvStore)

pub use warden_core as core;
pub use warden_framework as framework;
pub use warden_runtime as runtime;
pub use warden_transport as transport;

/// Commonly used types for writing bots.
///
/// ```rust,ignore
/// use warden::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use warden_runtime::{RunMode, WardenConfig, WardenRuntime};

    // Dispatch
    pub use warden_framework::{
        BoxError, Ctx, Dispatcher, Handler, LEFT_CHAT_MEMBER, NEW_CHAT_MEMBERS, Next, ON_TEXT,
        ON_UNKNOWN_COMMAND, middleware_fn,
    };

    // Platform
    pub use warden_core::{
        ApiError, Bot, ChatRef, Event, EventKind, InlineKeyboardButton, KvStore,
        PermissionCache, ReplyMarkup, SendOptions, SharedStore,
    };
}

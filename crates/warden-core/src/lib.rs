//! # Warden Core
//!
//! Building blocks shared by every layer of the Warden bot engine.
//!
//! - **Wire model**: the Bot API update shapes ([`Update`], [`Message`], ...)
//! - **Update parser**: bytes to a normalized [`Event`] ([`parse_update`])
//! - **Object pools**: recycling [`Pool`] with RAII [`Pooled`] guards
//! - **Store**: the TTL [`KvStore`] contract and an in-process [`MemoryStore`]
//! - **Platform handle**: [`Bot`] over a pluggable [`ApiCaller`]
//! - **Permission cache**: cache-aside admin lookup ([`PermissionCache`])
//!
//! ```text
//! bytes ──parse_update──▶ Event ──▶ (framework: dispatch)
//!                                       │
//!                          Bot ◀────────┤
//!                          PermissionCache ──▶ KvStore / getChatMember
//! ```

pub mod api;
pub mod bot;
pub mod error;
pub mod event;
pub mod model;
pub mod permission;
pub mod pool;
pub mod store;

pub use api::{ApiCaller, MockCaller, RecordedCall};
pub use bot::{Bot, ChatRef, SendOptions};
pub use error::{
    ApiError, ApiResult, EventError, EventResult, StoreError, StoreResult,
};
pub use event::{CALLBACK_DELIMITER, Command, Event, EventKind, decode_update, parse_update};
pub use model::{
    BotIdentity, CallbackQuery, Chat, ChatMember, InlineKeyboardButton, Message, ReplyMarkup,
    Update, User,
};
pub use permission::{DEFAULT_ADMIN_TTL, PermissionCache};
pub use pool::{BufferPool, Pool, Pooled, Recycle, buffer_pool};
pub use store::{KvStore, MemoryStore, SharedStore};

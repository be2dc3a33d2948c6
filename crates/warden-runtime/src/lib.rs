//! # Warden Runtime
//!
//! Turns configuration into a running bot.
//!
//! - [`config`]: figment-layered [`WardenConfig`] with validation
//! - [`logging`]: `tracing-subscriber` setup driven by the `logging` section
//! - [`WardenRuntime`]: owns the bot handle, store and permission cache,
//!   collects handlers, runs the long-poll or webhook adapter, and drains
//!   running handlers on Ctrl+C / SIGTERM
//!
//! ```ignore
//! use warden_runtime::WardenRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = WardenRuntime::builder().build().await?;
//!     runtime.register("/start", |ctx: Ctx| async move {
//!         ctx.send("hello").await.map(|_| ())
//!     });
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, RunMode, WardenConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, WardenRuntime, wait_for_shutdown};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

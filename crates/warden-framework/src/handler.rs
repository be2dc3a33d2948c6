//! Handler system.
//!
//! Any `async fn(Ctx)` (or closure returning a future) is a [`Handler`] as long
//! as it returns `()` or `Result<(), E>` with `E: Into<BoxError>`. Handlers are
//! wrapped in [`HandlerService`], a plain `tower::Service<Ctx>`, so middleware
//! is expressed as ordinary tower layers stacked on top.
//!
//! ```rust,ignore
//! async fn ban(ctx: Ctx) -> Result<(), ApiError> {
//!     ctx.reply("banned").await?;
//!     Ok(())
//! }
//!
//! builder.register("/ban", ban);
//! ```

use std::future::Future;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service};

use crate::context::Ctx;

/// Type-erased handler stack as stored by the dispatcher.
pub type BoxedService = BoxCloneSyncService<Ctx, (), BoxError>;

// ============================================================================
// HandlerOutput
// ============================================================================

/// Return types a handler may produce.
pub trait HandlerOutput: Send + 'static {
    fn into_result(self) -> Result<(), BoxError>;
}

impl HandlerOutput for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> HandlerOutput for Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// An async function over the dispatch context.
pub trait Handler: Clone + Send + Sync + 'static {
    fn call(&self, ctx: Ctx) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Ctx) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn call(&self, ctx: Ctx) -> BoxFuture<'static, Result<(), BoxError>> {
        let fut = self(ctx);
        async move { fut.await.into_result() }.boxed()
    }
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single [`Handler`].
#[derive(Clone)]
pub struct HandlerService<H> {
    handler: H,
}

impl<H: Handler> HandlerService<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Erases the handler type for storage in the dispatcher.
    pub fn boxed(self) -> BoxedService {
        BoxCloneSyncService::new(self)
    }
}

impl<H: Handler> Service<Ctx> for HandlerService<H> {
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Ctx) -> Self::Future {
        Handler::call(&self.handler, ctx)
    }
}

/// Wraps `handler` into a boxed service.
pub fn into_service<H: Handler>(handler: H) -> BoxedService {
    HandlerService::new(handler).boxed()
}

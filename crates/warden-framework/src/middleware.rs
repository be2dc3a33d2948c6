//! Middleware.
//!
//! Middleware is any tower [`Layer`] over [`BoxedService`]. For the common case
//! of "do something, then maybe call the rest of the chain", [`middleware_fn`]
//! turns an async closure taking `(Ctx, Next)` into a layer:
//!
//! ```rust,ignore
//! builder.layer(middleware_fn(|ctx: Ctx, next: Next| async move {
//!     let started = Instant::now();
//!     let result = next.run(ctx).await;
//!     debug!(elapsed = ?started.elapsed(), "handled");
//!     result
//! }));
//! ```
//!
//! Returning without calling [`Next::run`] stops the chain; the handler never
//! runs.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Layer, Service, ServiceExt};

use crate::context::Ctx;
use crate::handler::{BoxedService, HandlerOutput};

/// A layer erased to a function over boxed services.
pub(crate) type BoxedLayer = Arc<dyn Fn(BoxedService) -> BoxedService + Send + Sync>;

/// Erases any compatible tower layer.
pub(crate) fn boxed_layer<L>(layer: L) -> BoxedLayer
where
    L: Layer<BoxedService> + Send + Sync + 'static,
    L::Service: Service<Ctx, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
    <L::Service as Service<Ctx>>::Future: Send + 'static,
{
    Arc::new(move |inner| BoxCloneSyncService::new(layer.layer(inner)))
}

/// The remainder of the chain after the current middleware.
pub struct Next {
    inner: BoxedService,
}

impl Next {
    /// Runs the rest of the chain (inner middleware, then the handler).
    pub async fn run(self, ctx: Ctx) -> Result<(), BoxError> {
        self.inner.oneshot(ctx).await
    }
}

/// Builds a middleware layer from an async closure.
pub fn middleware_fn<F, Fut>(f: F) -> FnLayer<F>
where
    F: Fn(Ctx, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    FnLayer { f }
}

/// Layer produced by [`middleware_fn`].
#[derive(Clone)]
pub struct FnLayer<F> {
    f: F,
}

impl<F: Clone> Layer<BoxedService> for FnLayer<F> {
    type Service = FnService<F>;

    fn layer(&self, inner: BoxedService) -> Self::Service {
        FnService {
            f: self.f.clone(),
            inner,
        }
    }
}

/// Service produced by [`FnLayer`].
#[derive(Clone)]
pub struct FnService<F> {
    f: F,
    inner: BoxedService,
}

impl<F, Fut> Service<Ctx> for FnService<F>
where
    F: Fn(Ctx, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Ctx) -> Self::Future {
        let next = Next {
            inner: self.inner.clone(),
        };
        let fut = (self.f)(ctx, next);
        async move { fut.await.into_result() }.boxed()
    }
}

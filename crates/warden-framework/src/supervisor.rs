//! Supervised fire-and-forget execution of handler chains.
//!
//! Each dispatched event runs in its own task on a [`TaskSupervisor`]. The
//! spawning side never waits: the concurrency permit is acquired inside the
//! task, so a slow handler backs up work in the supervisor instead of stalling
//! the webhook or poll loop.
//!
//! A panic inside a chain is caught at the task boundary, logged and counted
//! as a fault; it never takes other tasks down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, error, warn};

use crate::error::{DispatchError, DispatchResult};

/// Default bound on concurrently running handler chains.
pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    faulted: AtomicU64,
    /// Set once by `shutdown`; the tracker stays closed from then on.
    draining: AtomicBool,
}

/// Point-in-time copy of the supervisor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Tasks spawned and not yet finished (waiting for a permit included).
    pub in_flight: usize,
    /// Chains that returned `Ok`.
    pub completed: u64,
    /// Chains that returned an error.
    pub failed: u64,
    /// Chains that panicked.
    pub faulted: u64,
}

/// Tracks and bounds handler tasks.
#[derive(Debug, Clone)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl TaskSupervisor {
    /// Creates a supervisor running at most `max_concurrency` chains at once.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawns the chain dispatched to `route` and returns immediately.
    ///
    /// The task runs inside `span`. Its outcome is recorded in the counters.
    pub fn spawn<F>(&self, route: impl Into<String>, span: Span, chain: F)
    where
        F: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        let route = route.into();
        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        counters.in_flight.fetch_add(1, Ordering::AcqRel);

        self.tracker.spawn(
            async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => Some(run_guarded(&route, chain).await),
                    Err(_) => {
                        warn!(%route, "Supervisor closed, dropping handler chain");
                        None
                    }
                };

                match outcome {
                    Some(Ok(())) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Err(e)) if e.is_fault() => {
                        counters.faulted.fetch_add(1, Ordering::Relaxed);
                        error!(route = e.route(), error = %e, "Handler fault");
                    }
                    Some(Err(e)) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(route = e.route(), error = %e, "Handler returned an error");
                    }
                    None => {}
                }
                counters.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            .instrument(span),
        );
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            in_flight: self.counters.in_flight.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            faulted: self.counters.faulted.load(Ordering::Relaxed),
        }
    }

    /// Waits until every task spawned so far has finished.
    ///
    /// New tasks may still be spawned afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.counters.draining.load(Ordering::Acquire) {
            self.tracker.reopen();
            // shutdown may have started while reopening
            if self.counters.draining.load(Ordering::Acquire) {
                self.tracker.close();
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.counters.draining.load(Ordering::Acquire) && self.tracker.is_closed()
    }

    /// Waits up to `grace` for running tasks to drain.
    ///
    /// Returns whether everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.counters.draining.store(true, Ordering::Release);
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                in_flight = self.stats().in_flight,
                "Handlers still running after shutdown grace period"
            );
        }
        drained
    }
}

/// Runs a chain, turning a panic into [`DispatchError::HandlerFault`].
///
/// Everything the chain owns, the pooled context included, is dropped
/// before this returns.
pub(crate) async fn run_guarded<F>(route: &str, chain: F) -> DispatchResult<()>
where
    F: Future<Output = DispatchResult<()>>,
{
    match AssertUnwindSafe(chain).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(DispatchError::from_panic(route, payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    async fn explode() -> DispatchResult<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_counts_outcomes() {
        let supervisor = TaskSupervisor::new(4);

        supervisor.spawn("t", Span::none(), async { Ok(()) });
        supervisor.spawn("t", Span::none(), async {
            Err(DispatchError::Handler {
                route: "/ban".into(),
                source: "nope".into(),
            })
        });
        supervisor.spawn("t", Span::none(), explode());

        supervisor.wait_idle().await;
        let stats = supervisor.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.faulted, 1);
    }

    #[tokio::test]
    async fn test_spawn_does_not_wait_for_permit() {
        let supervisor = TaskSupervisor::new(1);
        let gate = Arc::new(Notify::new());

        let blocker = gate.clone();
        supervisor.spawn("t", Span::none(), async move {
            blocker.notified().await;
            Ok(())
        });
        // returns immediately even though the only permit is taken
        supervisor.spawn("t", Span::none(), async { Ok(()) });
        assert_eq!(supervisor.stats().in_flight, 2);

        gate.notify_one();
        supervisor.wait_idle().await;
        assert_eq!(supervisor.stats().completed, 2);

        supervisor.spawn("t", Span::none(), async { Ok(()) });
        supervisor.wait_idle().await;
        assert_eq!(supervisor.stats().completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_expires() {
        let supervisor = TaskSupervisor::new(1);
        supervisor.spawn("t", Span::none(), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        assert!(!supervisor.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_idle_keeps_shutdown_closed() {
        let supervisor = TaskSupervisor::new(2);
        supervisor.wait_idle().await;
        assert!(!supervisor.is_shutting_down());

        supervisor.spawn("t", Span::none(), async { Ok(()) });
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
        assert!(supervisor.is_shutting_down());

        supervisor.wait_idle().await;
        assert!(supervisor.is_shutting_down());
    }
}

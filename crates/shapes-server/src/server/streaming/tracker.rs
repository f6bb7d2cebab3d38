//! Admission and in-flight accounting for every call the server runs.
//!
//! All services share one [`CallTracker`]. It admits calls (or refuses them
//! with `Unavailable` once shutdown has started), hands each admitted call a
//! [`CallContext`] derived from the server-wide shutdown token, and counts how
//! many calls are still running so that shutdown can wait for them.

use super::context::{CallContext, deadline_from};
use crate::server::telemetry::{
    decrement_calls_inflight, increment_call_errors, increment_calls, increment_calls_inflight,
    record_call_duration,
};
use core::time::Duration;
use shapes_core::{Error, Result};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;

/// How often [`CallTracker::drain`] re-checks the in-flight count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct CallTracker {
    inner: Arc<Inner>,
}

struct Inner {
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                shutdown_token: CancellationToken::new(),
            }),
        }
    }

    /// Admits a call to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`refuse_new`](Self::refuse_new)
    /// has been called.
    pub fn begin(&self, method: &'static str, metadata: &MetadataMap) -> Result<CallContext> {
        // Count first, then check: a call racing with `refuse_new` is either
        // refused or visible to `drain`.
        let guard = CallGuard::acquire(Arc::clone(&self.inner), method);

        if !self.inner.accepting.load(Ordering::Acquire) {
            drop(guard);
            increment_call_errors(method);
            return Err(Error::ServiceShutdown);
        }

        increment_calls(method);
        #[cfg(feature = "tracing")]
        tracing::debug!(method, "call admitted");

        Ok(CallContext::new(
            method,
            self.inner.shutdown_token.child_token(),
            deadline_from(metadata),
            guard,
        ))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stops admitting calls. Calls already admitted keep running.
    pub fn refuse_new(&self) {
        self.inner.accepting.store(false, Ordering::Release);
    }

    /// Waits until no call is in flight, for at most `budget`.
    ///
    /// Returns `true` if every call finished in time.
    pub async fn drain(&self, budget: Duration) -> bool {
        timeout(budget, async {
            while self.in_flight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }

    /// Cancels every call still running.
    pub fn cancel_all(&self) {
        self.inner.shutdown_token.cancel();
    }
}

/// Keeps a call counted as in flight until dropped.
pub struct CallGuard {
    inner: Arc<Inner>,
    method: &'static str,
    start: Instant,
}

impl CallGuard {
    fn acquire(inner: Arc<Inner>, method: &'static str) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        increment_calls_inflight(method);
        Self {
            inner,
            method,
            start: Instant::now(),
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        decrement_calls_inflight(self.method);
        record_call_duration(self.method, self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_admitted_calls_until_released() {
        let tracker = CallTracker::new();
        let a = tracker.begin("A", &MetadataMap::new()).unwrap();
        let b = tracker.begin("B", &MetadataMap::new()).unwrap();
        assert_eq!(tracker.in_flight(), 2);

        drop(a);
        assert_eq!(tracker.in_flight(), 1);
        drop(b);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn refuses_calls_once_shutdown_starts() {
        let tracker = CallTracker::new();
        tracker.refuse_new();

        let err = tracker.begin("A", &MetadataMap::new()).err().unwrap();
        assert!(matches!(err, Error::ServiceShutdown));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_running_calls() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("A", &MetadataMap::new()).unwrap();
        tracker.refuse_new();

        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            drop(ctx);
        });

        assert!(tracker.drain(Duration::from_secs(5)).await);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_the_budget() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("A", &MetadataMap::new()).unwrap();

        assert!(!tracker.drain(Duration::from_secs(1)).await);
        assert_eq!(tracker.in_flight(), 1);

        tracker.cancel_all();
        assert!(matches!(ctx.check(), Err(Error::RequestCancelled)));
    }
}

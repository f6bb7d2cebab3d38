//! Per-call cancellation and deadline state.
//!
//! A [`CallContext`] is created by the [`CallTracker`] when a call is
//! admitted and is handed to whatever runs the call: the handler itself for
//! unary calls, or the task spawned for a streaming call. It carries:
//!
//! - a child of the server-wide shutdown token, so shutdown reaches every call;
//! - the caller's deadline, decoded from the `grpc-timeout` header;
//! - the in-flight guard, so the call counts as running until the context is
//!   dropped.
//!
//! [`CallTracker`]: super::tracker::CallTracker

use super::tracker::CallGuard;
use crate::server::telemetry::increment_call_errors;
use core::time::Duration;
use shapes_core::{Error, Result};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tonic::{Response, Status, metadata::MetadataMap};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Cancellation state of one in-flight call.
pub struct CallContext {
    method: &'static str,
    token: CancellationToken,
    deadline: Option<Instant>,
    _guard: CallGuard,
}

impl CallContext {
    pub(super) fn new(
        method: &'static str,
        token: CancellationToken,
        deadline: Option<Instant>,
        guard: CallGuard,
    ) -> Self {
        Self {
            method,
            token,
            deadline,
            _guard: guard,
        }
    }

    pub const fn method(&self) -> &'static str {
        self.method
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the call should stop now.
    ///
    /// An elapsed deadline takes precedence over cancellation, so a caller
    /// whose deadline passed during shutdown still sees `DeadlineExceeded`.
    pub fn check(&self) -> Result<()> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Err(Error::RequestCancelled);
        }
        Ok(())
    }

    /// Resolves once the call should stop, with the reason.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = sleep_until(deadline) => Error::DeadlineExceeded,
                () = self.token.cancelled() => Error::RequestCancelled,
            },
            None => {
                self.token.cancelled().await;
                Error::RequestCancelled
            }
        }
    }

    /// Sleeps for `duration`, waking early if the call is stopped.
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            err = self.done() => Err(err),
            () = sleep(duration) => Ok(()),
        }
    }

    /// Converts a handler outcome into the value tonic expects, recording the
    /// failure if there is one.
    pub fn reply<T>(&self, outcome: Result<T>) -> core::result::Result<Response<T>, Status> {
        outcome.map(Response::new).map_err(|e| self.fail(e))
    }

    /// Records a failed call and converts the error to its status.
    pub fn fail(&self, err: Error) -> Status {
        increment_call_errors(self.method);
        #[cfg(feature = "tracing")]
        tracing::warn!(method = self.method, "call failed: {err}");
        err.into()
    }
}

/// Reads the caller's deadline from request metadata.
///
/// A missing or malformed `grpc-timeout` means no deadline.
pub fn deadline_from(metadata: &MetadataMap) -> Option<Instant> {
    let raw = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    let timeout = parse_grpc_timeout(raw)?;
    Instant::now().checked_add(timeout)
}

/// Parses a `grpc-timeout` value: at most eight ASCII digits followed by one
/// unit character (`H`, `M`, `S`, `m`, `u` or `n`).
pub fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    let (digits, unit) = raw.split_at_checked(raw.len().checked_sub(1)?)?;
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(value * 60 * 60),
        "M" => Duration::from_secs(value * 60),
        "S" => Duration::from_secs(value),
        "m" => Duration::from_millis(value),
        "u" => Duration::from_micros(value),
        "n" => Duration::from_nanos(value),
        _ => return None,
    };
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::streaming::tracker::CallTracker;

    #[test]
    fn parses_every_unit() {
        let cases = [
            ("1H", Duration::from_secs(3600)),
            ("2M", Duration::from_secs(120)),
            ("5S", Duration::from_secs(5)),
            ("1000m", Duration::from_millis(1000)),
            ("250u", Duration::from_micros(250)),
            ("99999999n", Duration::from_nanos(99_999_999)),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_grpc_timeout(raw), Some(expected), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_timeouts() {
        for raw in ["", "S", "10", "123456789S", "1.5S", "-1S", "10x", "1é"] {
            assert_eq!(parse_grpc_timeout(raw), None, "{raw:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_reported_before_cancellation() {
        let tracker = CallTracker::new();
        let mut metadata = MetadataMap::new();
        metadata.insert(GRPC_TIMEOUT_HEADER, "100m".parse().unwrap());

        let ctx = tracker.begin("Test", &metadata).unwrap();
        assert!(ctx.check().is_ok());

        tokio::time::advance(Duration::from_millis(100)).await;
        tracker.cancel_all();
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_wakes_on_cancellation() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("Test", &MetadataMap::new()).unwrap();

        let cancel = tracker.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            cancel.cancel_all();
        });

        let started = Instant::now();
        let res = ctx.pause(Duration::from_secs(60)).await;
        assert!(matches!(res, Err(Error::RequestCancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn done_fires_at_the_deadline() {
        let tracker = CallTracker::new();
        let mut metadata = MetadataMap::new();
        metadata.insert(GRPC_TIMEOUT_HEADER, "2S".parse().unwrap());
        let ctx = tracker.begin("Test", &metadata).unwrap();

        let started = Instant::now();
        assert!(matches!(ctx.done().await, Error::DeadlineExceeded));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }
}

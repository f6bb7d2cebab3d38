//! Server-streaming responses produced by a spawned task.
//!
//! The handler validates its request, then calls [`spawn_stream`] with a
//! producer closure. The closure receives an [`Outbound`] and sends its
//! messages in order; tonic reads them from the returned [`ResponseStream`].
//!
//! If the producer fails, the error is forwarded to the client as the final
//! item of the stream. Messages already sent stay sent.

use super::context::CallContext;
use crate::server::telemetry::increment_messages_sent;
use core::{future::Future, pin::Pin};
use shapes_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::Status;

/// The boxed stream type every streaming handler returns.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = core::result::Result<T, Status>> + Send>>;

/// Sending half of a server stream, owned by the producing task.
pub struct Outbound<T> {
    ctx: Arc<CallContext>,
    tx: mpsc::Sender<core::result::Result<T, Status>>,
}

impl<T: Send + 'static> Outbound<T> {
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Queues `msg` for the client.
    ///
    /// Waits while the outbound queue is full, but never past the call's
    /// deadline or cancellation. Fails immediately if the client is gone.
    pub async fn send(&self, msg: T) -> Result<()> {
        self.ctx.check()?;

        tokio::select! {
            biased;
            err = self.ctx.done() => Err(err),
            res = self.tx.send(Ok(msg)) => {
                res.map_err(|_| Error::ChannelError {
                    context: "client stopped receiving".to_string(),
                })?;
                increment_messages_sent(self.ctx.method());
                Ok(())
            }
        }
    }
}

/// Runs `produce` on its own task and returns the stream it feeds.
///
/// `buffer` bounds how far the producer may run ahead of the client. The
/// call stays in flight until the producer returns.
pub fn spawn_stream<T, F, Fut>(ctx: CallContext, buffer: usize, produce: F) -> ResponseStream<T>
where
    T: Send + 'static,
    F: FnOnce(Outbound<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer);
    let ctx = Arc::new(ctx);

    #[cfg(feature = "tracing")]
    let span = tracing::info_span!("stream", method = ctx.method());

    let fut = async move {
        let out = Outbound {
            ctx: Arc::clone(&ctx),
            tx: tx.clone(),
        };
        let outcome = produce(out).await;
        settle(&ctx, &tx, outcome).await;
    };

    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(span)
    };

    tokio::spawn(fut);

    Box::pin(ReceiverStream::new(rx))
}

/// Reports the end of a streaming call.
///
/// On an internal error, we make a best effort to surface it to the client,
/// but the client may have disconnected already, in which case the failure
/// is only logged.
pub(super) async fn settle<T>(
    ctx: &CallContext,
    tx: &mpsc::Sender<core::result::Result<T, Status>>,
    outcome: Result<()>,
) {
    let err = match outcome {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(method = ctx.method(), "stream completed");
            return;
        }
        Err(err) => err,
    };

    let client_gone = matches!(err, Error::ChannelError { .. });
    let status = ctx.fail(err);
    if client_gone {
        return;
    }

    if let Err(_e) = tx.send(Err(status)).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(method = ctx.method(), "Failed to forward err: {}", _e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::streaming::tracker::CallTracker;
    use core::time::Duration;
    use tokio_stream::StreamExt;
    use tonic::{Code, metadata::MetadataMap};

    fn admit(tracker: &CallTracker, timeout: Option<&str>) -> CallContext {
        let mut metadata = MetadataMap::new();
        if let Some(timeout) = timeout {
            metadata.insert("grpc-timeout", timeout.parse().unwrap());
        }
        tracker.begin("Test", &metadata).unwrap()
    }

    #[tokio::test]
    async fn delivers_messages_in_order() {
        let tracker = CallTracker::new();
        let stream = spawn_stream(admit(&tracker, None), 2, |out| async move {
            for i in 0..10 {
                out.send(i).await?;
            }
            Ok(())
        });

        let received: Vec<_> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failure_terminates_after_the_sent_prefix() {
        let tracker = CallTracker::new();
        let stream = spawn_stream(admit(&tracker, None), 4, |out| async move {
            out.send(1).await?;
            out.send(2).await?;
            Err(Error::internal("store went away"))
        });

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(*items[1].as_ref().unwrap(), 2);
        assert_eq!(items[2].as_ref().unwrap_err().code(), Code::Internal);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_send_gives_up_at_the_deadline() {
        let tracker = CallTracker::new();
        let mut stream = spawn_stream(admit(&tracker, Some("1S")), 1, |out| async move {
            loop {
                out.send(0_u8).await?;
            }
        });

        // Let the producer fill the queue and block, then wait past the
        // deadline before reading.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item);
        }
        assert_eq!(last.unwrap().unwrap_err().code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn call_is_released_when_the_client_goes_away() {
        let tracker = CallTracker::new();
        let stream = spawn_stream(admit(&tracker, None), 1, |out| async move {
            loop {
                out.send(0_u8).await?;
            }
        });
        assert_eq!(tracker.in_flight(), 1);

        drop(stream);
        assert!(tracker.drain(Duration::from_secs(5)).await);
    }
}

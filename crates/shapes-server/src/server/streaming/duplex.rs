//! Bidirectional calls served by a single task.
//!
//! The task is a state machine with one suspension point per direction: it
//! waits on whichever of "next inbound message" and "room in the outbound
//! queue" is ready first. Responses produced by an [`Exchange`] are parked in
//! a local queue and moved to the transport as capacity appears.
//!
//! Input is only read while the local queue holds fewer than `buffer`
//! messages, so a client that stops reading eventually stops being read from.
//! Output never waits on input: queued responses keep flowing while the task
//! waits for the next request. After the client half-closes, everything
//! still queued is delivered before the stream ends.

use super::{
    context::CallContext,
    producer::{ResponseStream, settle},
};
use crate::server::telemetry::increment_messages_sent;
use shapes_core::{Error, Result};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tonic::Status;

/// Per-call logic of a bidirectional method.
///
/// Implementations see each inbound message once, in order, and push any
/// number of responses onto `out`. State lives in `self` and is dropped with
/// the call.
pub trait Exchange: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn on_message(&mut self, msg: Self::In, out: &mut VecDeque<Self::Out>) -> Result<()>;

    /// Called once when the client half-closes.
    fn on_half_close(&mut self, _out: &mut VecDeque<Self::Out>) -> Result<()> {
        Ok(())
    }
}

/// Spawns the task serving one bidirectional call and returns its response
/// stream.
pub fn spawn_duplex<E, S>(
    ctx: CallContext,
    buffer: usize,
    inbound: S,
    exchange: E,
) -> ResponseStream<E::Out>
where
    E: Exchange,
    S: Stream<Item = core::result::Result<E::In, Status>> + Send + Unpin + 'static,
{
    let buffer = buffer.max(1);
    let (tx, rx) = mpsc::channel(buffer);

    #[cfg(feature = "tracing")]
    let span = tracing::info_span!("duplex", method = ctx.method());

    let fut = async move {
        let outcome = run(&ctx, &tx, buffer, inbound, exchange).await;
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

async fn run<E, S>(
    ctx: &CallContext,
    tx: &mpsc::Sender<core::result::Result<E::Out, Status>>,
    buffer: usize,
    mut inbound: S,
    mut exchange: E,
) -> Result<()>
where
    E: Exchange,
    S: Stream<Item = core::result::Result<E::In, Status>> + Unpin,
{
    let mut pending = VecDeque::new();
    let mut input_open = true;

    loop {
        if !input_open && pending.is_empty() {
            return Ok(());
        }

        tokio::select! {
            err = ctx.done() => return Err(err),

            next = inbound.next(), if input_open && pending.len() < buffer => match next {
                Some(Ok(msg)) => exchange.on_message(msg, &mut pending)?,
                Some(Err(status)) => return Err(Error::from_inbound(&status)),
                None => {
                    input_open = false;
                    exchange.on_half_close(&mut pending)?;
                }
            },

            permit = tx.reserve(), if !pending.is_empty() => {
                let permit = permit.map_err(|_| Error::ChannelError {
                    context: "client stopped receiving".to_string(),
                })?;
                if let Some(msg) = pending.pop_front() {
                    permit.send(Ok(msg));
                    increment_messages_sent(ctx.method());
                }
            }
        }
    }
}

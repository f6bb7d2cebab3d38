//! Client-streaming input consumed until half-close.

use super::context::CallContext;
use shapes_core::{Error, Result};
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Feeds every inbound message to `step`, in arrival order, and returns the
/// accumulator once the client half-closes.
///
/// Nothing is produced before half-close. The fold stops early if `step`
/// fails, if the inbound stream fails, or if the call is cancelled or runs
/// past its deadline while waiting for the next message.
pub async fn fold_inbound<M, S, A, F>(
    ctx: &CallContext,
    mut inbound: S,
    init: A,
    mut step: F,
) -> Result<A>
where
    S: Stream<Item = core::result::Result<M, Status>> + Unpin,
    F: FnMut(&mut A, M) -> Result<()>,
{
    let mut acc = init;
    loop {
        let next = tokio::select! {
            err = ctx.done() => return Err(err),
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(msg)) => step(&mut acc, msg)?,
            Some(Err(status)) => return Err(Error::from_inbound(&status)),
            None => return Ok(acc),
        }
    }
}

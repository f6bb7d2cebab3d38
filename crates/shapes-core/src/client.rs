//! Client drivers for the generated service stubs.
//!
//! Each function wraps one RPC and hides the plumbing of its interaction
//! shape: unary calls return the single response, server streams are drained
//! into a `Vec`, and client streams are fed from a vector and half-closed once
//! it is exhausted.
//!
//! ## Bidirectional calls
//!
//! A full-duplex call must never be driven as "send everything, then read
//! everything": once the server's outbound buffer fills it stops reading, our
//! sends stop being accepted, and both sides wait on each other forever. The
//! bidirectional drivers ([`find_maximum`], [`greet_everyone`]) therefore run
//! the sending half on its own task (see [`spawn_feeder`]) while the calling
//! task receives, mirroring what the server does with its two suspension
//! points.

use crate::proto::{
    calculator::{
        AverageRequest, FindMaximumRequest, PrimeNumberDecompositionRequest, SquareRootRequest,
        SumRequest, calculator_client::CalculatorClient,
    },
    document::{
        CreateDocumentRequest, DeleteDocumentRequest, Document, ListDocumentsRequest,
        ReadDocumentRequest, UpdateDocumentRequest, documents_client::DocumentsClient,
    },
    greet::{
        GreetEveryoneRequest, GreetManyTimesRequest, GreetRequest, GreetWithDeadlineRequest,
        Greeting, LongGreetRequest, greeter_client::GreeterClient,
    },
};
use core::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Status, Streaming, transport::Channel};

/// Capacity of the channel between a feeder task and the transport.
const FEEDER_BUFFER: usize = 16;

/// Spawns a task that sends `items` in order, sleeping `pace` between them.
///
/// The returned stream is handed to tonic as the request body; it ends (the
/// client half-closes) when every item has been sent. The task stops early if
/// the call is torn down, and resolves to the number of items it delivered.
pub fn spawn_feeder<T>(
    items: Vec<T>,
    pace: Option<Duration>,
) -> (ReceiverStream<T>, JoinHandle<usize>)
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(FEEDER_BUFFER);

    let handle = tokio::spawn(async move {
        let mut sent = 0;
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
            sent += 1;
            if let Some(pace) = pace {
                tokio::time::sleep(pace).await;
            }
        }
        sent
    });

    (ReceiverStream::new(rx), handle)
}

/// Receives every message of a server stream until the server closes it.
///
/// # Errors
///
/// Returns the status that terminated the stream. Messages received before
/// the failure are discarded, since a failed call produced no usable result.
pub async fn drain<T>(mut stream: Streaming<T>) -> Result<Vec<T>, Status> {
    let mut out = Vec::new();
    while let Some(msg) = stream.message().await? {
        out.push(msg);
    }
    Ok(out)
}

async fn join_feeder(handle: JoinHandle<usize>) -> Result<usize, Status> {
    handle
        .await
        .map_err(|e| Status::internal(format!("feeder task failed: {e}")))
}

fn greet_request<T>(first_name: &str, build: impl FnOnce(Option<Greeting>) -> T) -> T {
    build(Some(Greeting::named(first_name)))
}

pub async fn greet(client: &mut GreeterClient<Channel>, first_name: &str) -> Result<String, Status> {
    let req = greet_request(first_name, |greeting| GreetRequest { greeting });
    Ok(client.greet(req).await?.into_inner().result)
}

pub async fn greet_many_times(
    client: &mut GreeterClient<Channel>,
    first_name: &str,
) -> Result<Vec<String>, Status> {
    let req = greet_request(first_name, |greeting| GreetManyTimesRequest { greeting });
    let stream = client.greet_many_times(req).await?.into_inner();
    Ok(drain(stream).await?.into_iter().map(|r| r.result).collect())
}

pub async fn long_greet(
    client: &mut GreeterClient<Channel>,
    first_names: &[&str],
    pace: Option<Duration>,
) -> Result<String, Status> {
    let requests = first_names
        .iter()
        .map(|name| greet_request(name, |greeting| LongGreetRequest { greeting }))
        .collect();
    let (outbound, feeder) = spawn_feeder(requests, pace);

    let result = client.long_greet(outbound).await?.into_inner().result;
    join_feeder(feeder).await?;
    Ok(result)
}

pub async fn greet_everyone(
    client: &mut GreeterClient<Channel>,
    first_names: &[&str],
    pace: Option<Duration>,
) -> Result<Vec<String>, Status> {
    let requests = first_names
        .iter()
        .map(|name| greet_request(name, |greeting| GreetEveryoneRequest { greeting }))
        .collect();
    let (outbound, feeder) = spawn_feeder(requests, pace);

    let inbound = client.greet_everyone(outbound).await?.into_inner();
    let replies = drain(inbound).await?;
    join_feeder(feeder).await?;
    Ok(replies.into_iter().map(|r| r.result).collect())
}

/// Message tonic's server-side timeout uses when it answers for the handler.
const TRANSPORT_TIMEOUT: &str = "Timeout expired";

/// Restores the deadline classification of a status cut short by the
/// server's transport timer.
///
/// When the `grpc-timeout` budget runs out, tonic may answer with
/// `Cancelled` before the handler reports `DeadlineExceeded`. Callers only
/// care that their deadline passed, so both become `DeadlineExceeded`.
pub fn reclassify_timeout(status: Status) -> Status {
    if status.code() == Code::Cancelled && status.message() == TRANSPORT_TIMEOUT {
        Status::deadline_exceeded(TRANSPORT_TIMEOUT)
    } else {
        status
    }
}

/// Calls `GreetWithDeadline` with `timeout` as the call deadline.
///
/// # Errors
///
/// A deadline shorter than the server's work surfaces as
/// [`Code::DeadlineExceeded`], whichever side noticed it first.
pub async fn greet_with_deadline(
    client: &mut GreeterClient<Channel>,
    first_name: &str,
    timeout: Duration,
) -> Result<String, Status> {
    let mut req = Request::new(greet_request(first_name, |greeting| {
        GreetWithDeadlineRequest { greeting }
    }));
    req.set_timeout(timeout);
    let res = client
        .greet_with_deadline(req)
        .await
        .map_err(reclassify_timeout)?;
    Ok(res.into_inner().result)
}

pub async fn sum(
    client: &mut CalculatorClient<Channel>,
    first_number: i32,
    second_number: i32,
) -> Result<i64, Status> {
    let req = SumRequest {
        first_number,
        second_number,
    };
    Ok(client.sum(req).await?.into_inner().result)
}

pub async fn prime_factors(
    client: &mut CalculatorClient<Channel>,
    number: i64,
) -> Result<Vec<i64>, Status> {
    let stream = client
        .prime_number_decomposition(PrimeNumberDecompositionRequest { number })
        .await?
        .into_inner();
    Ok(drain(stream).await?.into_iter().map(|r| r.factor).collect())
}

pub async fn average(
    client: &mut CalculatorClient<Channel>,
    numbers: Vec<i32>,
    pace: Option<Duration>,
) -> Result<f64, Status> {
    let requests = numbers
        .into_iter()
        .map(|number| AverageRequest { number })
        .collect();
    let (outbound, feeder) = spawn_feeder(requests, pace);

    let result = client.average(outbound).await?.into_inner().result;
    join_feeder(feeder).await?;
    Ok(result)
}

/// Streams `numbers` to `FindMaximum` and collects every running maximum.
pub async fn find_maximum(
    client: &mut CalculatorClient<Channel>,
    numbers: Vec<f32>,
    pace: Option<Duration>,
) -> Result<Vec<f32>, Status> {
    let requests = numbers
        .into_iter()
        .map(|next_number| FindMaximumRequest { next_number })
        .collect();
    let (outbound, feeder) = spawn_feeder(requests, pace);

    let mut inbound = client.find_maximum(outbound).await?.into_inner();
    let mut maxima = Vec::new();
    while let Some(reply) = inbound.message().await? {
        maxima.push(reply.current_max);
    }

    join_feeder(feeder).await?;
    Ok(maxima)
}

pub async fn square_root(client: &mut CalculatorClient<Channel>, number: i32) -> Result<f64, Status> {
    let reply = client.square_root(SquareRootRequest { number }).await?;
    Ok(reply.into_inner().number_root)
}

fn expect_document(document: Option<Document>) -> Result<Document, Status> {
    document.ok_or_else(|| Status::internal("response carried no document"))
}

pub async fn create_document(
    client: &mut DocumentsClient<Channel>,
    document: Document,
) -> Result<Document, Status> {
    let req = CreateDocumentRequest {
        document: Some(document),
    };
    expect_document(client.create_document(req).await?.into_inner().document)
}

pub async fn read_document(
    client: &mut DocumentsClient<Channel>,
    document_id: &str,
) -> Result<Document, Status> {
    let req = ReadDocumentRequest {
        document_id: document_id.to_owned(),
    };
    expect_document(client.read_document(req).await?.into_inner().document)
}

pub async fn update_document(
    client: &mut DocumentsClient<Channel>,
    document: Document,
) -> Result<Document, Status> {
    let req = UpdateDocumentRequest {
        document: Some(document),
    };
    expect_document(client.update_document(req).await?.into_inner().document)
}

pub async fn delete_document(
    client: &mut DocumentsClient<Channel>,
    document_id: &str,
) -> Result<String, Status> {
    let req = DeleteDocumentRequest {
        document_id: document_id.to_owned(),
    };
    Ok(client.delete_document(req).await?.into_inner().document_id)
}

pub async fn list_documents(client: &mut DocumentsClient<Channel>) -> Result<Vec<Document>, Status> {
    let stream = client
        .list_documents(ListDocumentsRequest {})
        .await?
        .into_inner();
    drain(stream)
        .await?
        .into_iter()
        .map(|r| expect_document(r.document))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn transport_timeout_reads_as_deadline_exceeded() {
        let status = reclassify_timeout(Status::cancelled("Timeout expired"));
        assert_eq!(status.code(), Code::DeadlineExceeded);

        let status = reclassify_timeout(Status::cancelled("client went away"));
        assert_eq!(status.code(), Code::Cancelled);

        let status = reclassify_timeout(Status::deadline_exceeded("too slow"));
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(status.message(), "too slow");
    }

    #[tokio::test(start_paused = true)]
    async fn feeder_delivers_in_order_and_half_closes() {
        let (stream, handle) = spawn_feeder(vec![1, 2, 3], Some(Duration::from_millis(100)));

        let received: Vec<_> = stream.collect().await;
        assert_eq!(received, vec![1, 2, 3]);
        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn feeder_stops_when_the_call_goes_away() {
        let (stream, handle) = spawn_feeder((0..1_000).collect::<Vec<u32>>(), None);
        drop(stream);

        let sent = handle.await.unwrap();
        assert!(sent <= FEEDER_BUFFER, "sent {sent} items into a dropped call");
    }
}

//! `greet.Greeter`: one greeting per call shape.

use super::ServiceSettings;
use crate::server::streaming::{
    CallContext, CallTracker, ResponseStream,
    collector::fold_inbound,
    duplex::{Exchange, spawn_duplex},
    producer::spawn_stream,
};
use shapes_core::{
    proto::greet::{
        GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest,
        GreetManyTimesResponse, GreetRequest, GreetResponse, GreetWithDeadlineRequest,
        GreetWithDeadlineResponse, Greeting, LongGreetRequest, LongGreetResponse,
        greeter_server::Greeter,
    },
};
use std::collections::VecDeque;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

/// Number of messages `GreetManyTimes` sends.
pub const GREET_MANY_TIMES_COUNT: u32 = 10;

#[derive(Clone)]
pub struct GreetService {
    tracker: CallTracker,
    settings: ServiceSettings,
}

impl GreetService {
    pub const fn new(tracker: CallTracker, settings: ServiceSettings) -> Self {
        Self { tracker, settings }
    }

    /// The work model of `GreetWithDeadline`: a fixed number of steps, with
    /// the call checked before each one. A step is abandoned as soon as the
    /// deadline passes or the call is cancelled.
    async fn greet_slowly(
        &self,
        ctx: &CallContext,
        first_name: &str,
    ) -> shapes_core::Result<GreetWithDeadlineResponse> {
        for _step in 0..self.settings.deadline_steps {
            ctx.check()?;
            #[cfg(feature = "tracing")]
            tracing::trace!(step = _step, "working");
            ctx.pause(self.settings.deadline_step).await?;
        }

        Ok(GreetWithDeadlineResponse {
            result: format!("hello {first_name}"),
        })
    }
}

fn first_name(greeting: Option<Greeting>) -> String {
    greeting.map(|g| g.first_name).unwrap_or_default()
}

fn salute(first_name: &str) -> String {
    format!("Hello {first_name}! ")
}

/// Concatenates one salutation per inbound greeting.
pub async fn long_greet<S>(ctx: &CallContext, inbound: S) -> shapes_core::Result<LongGreetResponse>
where
    S: Stream<Item = Result<LongGreetRequest, Status>> + Unpin,
{
    let result = fold_inbound(ctx, inbound, String::new(), |acc, msg| {
        acc.push_str(&salute(&first_name(msg.greeting)));
        Ok(())
    })
    .await?;

    Ok(LongGreetResponse { result })
}

/// Answers every greeting as soon as it arrives.
#[derive(Default)]
pub struct Salutations;

impl Exchange for Salutations {
    type In = GreetEveryoneRequest;
    type Out = GreetEveryoneResponse;

    fn on_message(
        &mut self,
        msg: Self::In,
        out: &mut VecDeque<Self::Out>,
    ) -> shapes_core::Result<()> {
        out.push_back(GreetEveryoneResponse {
            result: salute(&first_name(msg.greeting)),
        });
        Ok(())
    }
}

#[tonic::async_trait]
impl Greeter for GreetService {
    type GreetManyTimesStream = ResponseStream<GreetManyTimesResponse>;
    type GreetEveryoneStream = ResponseStream<GreetEveryoneResponse>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn greet(&self, req: Request<GreetRequest>) -> Result<Response<GreetResponse>, Status> {
        let ctx = self.tracker.begin("Greet", req.metadata())?;
        let first_name = first_name(req.into_inner().greeting);

        ctx.reply(ctx.check().map(|()| GreetResponse {
            result: format!("hello {first_name}"),
        }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn greet_many_times(
        &self,
        req: Request<GreetManyTimesRequest>,
    ) -> Result<Response<Self::GreetManyTimesStream>, Status> {
        let ctx = self.tracker.begin("GreetManyTimes", req.metadata())?;
        let first_name = first_name(req.into_inner().greeting);
        let interval = self.settings.greet_interval;

        let stream = spawn_stream(ctx, self.settings.stream_buffer_size, move |out| async move {
            for i in 0..GREET_MANY_TIMES_COUNT {
                if i > 0 {
                    out.context().pause(interval).await?;
                }
                out.send(GreetManyTimesResponse {
                    result: format!("Hello {first_name} number {i}"),
                })
                .await?;
            }
            Ok(())
        });

        Ok(Response::new(stream))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn long_greet(
        &self,
        req: Request<Streaming<LongGreetRequest>>,
    ) -> Result<Response<LongGreetResponse>, Status> {
        let ctx = self.tracker.begin("LongGreet", req.metadata())?;
        ctx.reply(long_greet(&ctx, req.into_inner()).await)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn greet_everyone(
        &self,
        req: Request<Streaming<GreetEveryoneRequest>>,
    ) -> Result<Response<Self::GreetEveryoneStream>, Status> {
        let ctx = self.tracker.begin("GreetEveryone", req.metadata())?;
        let stream = spawn_duplex(
            ctx,
            self.settings.stream_buffer_size,
            req.into_inner(),
            Salutations,
        );
        Ok(Response::new(stream))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn greet_with_deadline(
        &self,
        req: Request<GreetWithDeadlineRequest>,
    ) -> Result<Response<GreetWithDeadlineResponse>, Status> {
        let ctx = self.tracker.begin("GreetWithDeadline", req.metadata())?;
        let first_name = first_name(req.into_inner().greeting);
        ctx.reply(self.greet_slowly(&ctx, &first_name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::time::Instant;
    use tokio_stream::StreamExt;
    use tonic::{Code, metadata::MetadataMap};

    fn service() -> (CallTracker, GreetService) {
        let tracker = CallTracker::new();
        let svc = GreetService::new(tracker.clone(), ServiceSettings::default());
        (tracker, svc)
    }

    fn deadline_request(timeout: Option<&str>) -> Request<GreetWithDeadlineRequest> {
        let mut req = Request::new(GreetWithDeadlineRequest {
            greeting: Some(Greeting::named("Stephane")),
        });
        if let Some(timeout) = timeout {
            req.metadata_mut()
                .insert("grpc-timeout", timeout.parse().unwrap());
        }
        req
    }

    #[tokio::test]
    async fn greets_by_first_name() {
        let (_, svc) = service();
        let req = Request::new(GreetRequest {
            greeting: Some(Greeting::named("Stephane")),
        });

        let res = svc.greet(req).await.unwrap().into_inner();
        assert_eq!(res.result, "hello Stephane");
    }

    #[tokio::test(start_paused = true)]
    async fn short_deadline_is_exceeded() {
        let (tracker, svc) = service();

        let status = svc
            .greet_with_deadline(deadline_request(Some("1S")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn generous_deadline_succeeds() {
        let (_, svc) = service();
        let started = Instant::now();

        let res = svc
            .greet_with_deadline(deadline_request(Some("5S")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(res.result, "hello Stephane");
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_runs_to_completion() {
        let (_, svc) = service();
        let res = svc.greet_with_deadline(deadline_request(None)).await.unwrap();
        assert_eq!(res.into_inner().result, "hello Stephane");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_deadline_demo() {
        let (tracker, svc) = service();

        let call = tokio::spawn(async move { svc.greet_with_deadline(deadline_request(None)).await });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tracker.cancel_all();

        let status = call.await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn greets_many_times_in_order() {
        let (_, svc) = service();
        let req = Request::new(GreetManyTimesRequest {
            greeting: Some(Greeting::named("Stephane")),
        });
        let started = Instant::now();

        let stream = svc.greet_many_times(req).await.unwrap().into_inner();
        let results: Vec<String> = stream.map(|r| r.unwrap().result).collect().await;

        let expected: Vec<String> = (0..GREET_MANY_TIMES_COUNT)
            .map(|i| format!("Hello Stephane number {i}"))
            .collect();
        assert_eq!(results, expected);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn long_greet_concatenates_after_half_close() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("LongGreet", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::iter(["Stephane", "John", "Marc"].map(|name| {
            Ok(LongGreetRequest {
                greeting: Some(Greeting::named(name)),
            })
        }));

        let res = long_greet(&ctx, inbound).await.unwrap();
        assert_eq!(res.result, "Hello Stephane! Hello John! Hello Marc! ");
    }

    #[tokio::test]
    async fn long_greet_of_nobody_is_empty() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("LongGreet", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::empty::<Result<LongGreetRequest, Status>>();

        let res = long_greet(&ctx, inbound).await.unwrap();
        assert_eq!(res.result, "");
    }

    #[tokio::test]
    async fn greets_everyone_one_by_one() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("GreetEveryone", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::iter(["Stephane", "John"].map(|name| {
            Ok(GreetEveryoneRequest {
                greeting: Some(Greeting::named(name)),
            })
        }));

        let results: Vec<String> = spawn_duplex(ctx, 1, inbound, Salutations)
            .map(|r| r.unwrap().result)
            .collect()
            .await;
        assert_eq!(results, ["Hello Stephane! ", "Hello John! "]);
    }
}

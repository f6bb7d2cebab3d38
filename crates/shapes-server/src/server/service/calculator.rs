//! `calculator.Calculator`: numeric workloads, one per call shape.
//!
//! The per-call state machines ([`PrimeFactors`], [`RunningAverage`],
//! [`RunningMaximum`]) are plain values that know nothing about gRPC; the
//! handlers only plug them into the matching interaction helper.

use super::ServiceSettings;
use crate::server::streaming::{
    CallContext, CallTracker, ResponseStream,
    collector::fold_inbound,
    duplex::{Exchange, spawn_duplex},
    producer::spawn_stream,
};
use shapes_core::{
    Error,
    proto::calculator::{
        AverageRequest, AverageResponse, FindMaximumRequest, FindMaximumResponse,
        PrimeNumberDecompositionRequest, PrimeNumberDecompositionResponse, SquareRootRequest,
        SquareRootResponse, SumRequest, SumResponse, calculator_server::Calculator,
    },
};
use std::collections::VecDeque;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone)]
pub struct CalculatorService {
    tracker: CallTracker,
    settings: ServiceSettings,
}

impl CalculatorService {
    pub const fn new(tracker: CallTracker, settings: ServiceSettings) -> Self {
        Self { tracker, settings }
    }
}

/// Candidates tried per [`PrimeFactors::step`] before handing control back.
pub const TRIAL_BUDGET: u32 = 4096;

/// Prime factors of a positive number, smallest first.
///
/// Trial division by increasing candidates. Once the square of the candidate
/// exceeds what is left, the remainder is itself prime and is the last
/// factor. The factors of 1 are the empty sequence.
///
/// A large prime input costs about 1.5 billion divisions, so async callers
/// drive the search with [`step`](Self::step) and check the call between
/// slices instead of iterating.
#[derive(Clone, Debug)]
pub struct PrimeFactors {
    remainder: i64,
    candidate: i64,
}

/// Outcome of one bounded slice of the search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Factor(i64),
    /// The budget ran out before the next factor was found.
    Pending,
    Done,
}

impl PrimeFactors {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `number` is not positive.
    pub fn new(number: i64) -> shapes_core::Result<Self> {
        if number <= 0 {
            return Err(Error::invalid_argument(format!(
                "Cannot decompose a non-positive number: {number}"
            )));
        }
        Ok(Self {
            remainder: number,
            candidate: 2,
        })
    }

    /// Tries at most `budget` candidates.
    pub fn step(&mut self, budget: u32) -> Step {
        if self.remainder <= 1 {
            return Step::Done;
        }

        for _ in 0..budget {
            if self.candidate > self.remainder / self.candidate {
                let last = self.remainder;
                self.remainder = 1;
                return Step::Factor(last);
            }
            if self.remainder % self.candidate == 0 {
                self.remainder /= self.candidate;
                return Step::Factor(self.candidate);
            }
            self.candidate += if self.candidate == 2 { 1 } else { 2 };
        }
        Step::Pending
    }
}

impl Iterator for PrimeFactors {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            match self.step(TRIAL_BUDGET) {
                Step::Factor(factor) => return Some(factor),
                Step::Pending => {}
                Step::Done => return None,
            }
        }
    }
}

/// Sum and count of a client stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningAverage {
    sum: i64,
    count: u64,
}

impl RunningAverage {
    pub fn push(&mut self, number: i32) -> shapes_core::Result<()> {
        self.sum = self
            .sum
            .checked_add(i64::from(number))
            .ok_or_else(|| Error::invalid_argument("Sum of the inputs overflows"))?;
        self.count += 1;
        Ok(())
    }

    /// # Errors
    ///
    /// The average of nothing is undefined: an empty stream is an
    /// [`Error::InvalidArgument`].
    pub fn finish(self) -> shapes_core::Result<f64> {
        if self.count == 0 {
            return Err(Error::invalid_argument(
                "Cannot average an empty stream of numbers",
            ));
        }
        Ok(self.sum as f64 / self.count as f64)
    }
}

/// Largest value seen so far; answers every input with the current maximum.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningMaximum {
    current: Option<f32>,
}

impl RunningMaximum {
    pub fn observe(&mut self, number: f32) -> f32 {
        let max = match self.current {
            Some(current) => current.max(number),
            None => number,
        };
        self.current = Some(max);
        max
    }
}

impl Exchange for RunningMaximum {
    type In = FindMaximumRequest;
    type Out = FindMaximumResponse;

    fn on_message(
        &mut self,
        msg: FindMaximumRequest,
        out: &mut VecDeque<FindMaximumResponse>,
    ) -> shapes_core::Result<()> {
        out.push_back(FindMaximumResponse {
            current_max: self.observe(msg.next_number),
        });
        Ok(())
    }
}

/// Averages a client stream once it half-closes.
pub async fn average<S>(ctx: &CallContext, inbound: S) -> shapes_core::Result<AverageResponse>
where
    S: Stream<Item = Result<AverageRequest, Status>> + Unpin,
{
    let acc = fold_inbound(ctx, inbound, RunningAverage::default(), |acc, msg| {
        acc.push(msg.number)
    })
    .await?;

    Ok(AverageResponse {
        result: acc.finish()?,
    })
}

pub fn square_root(number: i32) -> shapes_core::Result<f64> {
    if number < 0 {
        return Err(Error::invalid_argument(format!(
            "Received a negative number: {number}"
        )));
    }
    Ok(f64::from(number).sqrt())
}

#[tonic::async_trait]
impl Calculator for CalculatorService {
    type PrimeNumberDecompositionStream = ResponseStream<PrimeNumberDecompositionResponse>;
    type FindMaximumStream = ResponseStream<FindMaximumResponse>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn sum(&self, req: Request<SumRequest>) -> Result<Response<SumResponse>, Status> {
        let ctx = self.tracker.begin("Sum", req.metadata())?;
        let SumRequest {
            first_number,
            second_number,
        } = req.into_inner();

        ctx.reply(Ok(SumResponse {
            result: i64::from(first_number) + i64::from(second_number),
        }))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(number = req.get_ref().number)))]
    async fn prime_number_decomposition(
        &self,
        req: Request<PrimeNumberDecompositionRequest>,
    ) -> Result<Response<Self::PrimeNumberDecompositionStream>, Status> {
        let ctx = self.tracker.begin("PrimeNumberDecomposition", req.metadata())?;
        let factors = PrimeFactors::new(req.into_inner().number).map_err(|e| ctx.fail(e))?;

        let stream = spawn_stream(ctx, self.settings.stream_buffer_size, move |out| async move {
            let mut factors = factors;
            loop {
                match factors.step(TRIAL_BUDGET) {
                    Step::Factor(factor) => {
                        out.send(PrimeNumberDecompositionResponse { factor }).await?;
                    }
                    Step::Pending => {
                        out.context().check()?;
                        tokio::task::yield_now().await;
                    }
                    Step::Done => return Ok(()),
                }
            }
        });

        Ok(Response::new(stream))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn average(
        &self,
        req: Request<Streaming<AverageRequest>>,
    ) -> Result<Response<AverageResponse>, Status> {
        let ctx = self.tracker.begin("Average", req.metadata())?;
        ctx.reply(average(&ctx, req.into_inner()).await)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn find_maximum(
        &self,
        req: Request<Streaming<FindMaximumRequest>>,
    ) -> Result<Response<Self::FindMaximumStream>, Status> {
        let ctx = self.tracker.begin("FindMaximum", req.metadata())?;
        let stream = spawn_duplex(
            ctx,
            self.settings.stream_buffer_size,
            req.into_inner(),
            RunningMaximum::default(),
        );
        Ok(Response::new(stream))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(number = req.get_ref().number)))]
    async fn square_root(
        &self,
        req: Request<SquareRootRequest>,
    ) -> Result<Response<SquareRootResponse>, Status> {
        let ctx = self.tracker.begin("SquareRoot", req.metadata())?;
        let number_root = square_root(req.into_inner().number);
        ctx.reply(number_root.map(|number_root| SquareRootResponse { number_root }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use tonic::{Code, metadata::MetadataMap};

    fn service() -> CalculatorService {
        CalculatorService::new(CallTracker::new(), ServiceSettings::default())
    }

    #[test]
    fn decomposes_120() {
        let factors: Vec<_> = PrimeFactors::new(120).unwrap().collect();
        assert_eq!(factors, [2, 2, 2, 3, 5]);
    }

    #[test]
    fn factors_are_sorted_and_multiply_back() {
        for n in [2, 97, 360, 1_001, 65_536, 999_983, 600_851_475_143] {
            let factors: Vec<i64> = PrimeFactors::new(n).unwrap().collect();
            assert!(factors.windows(2).all(|w| w[0] <= w[1]), "{n}: {factors:?}");
            assert_eq!(factors.iter().product::<i64>(), n);
        }
    }

    #[test]
    fn one_has_no_factors() {
        assert_eq!(PrimeFactors::new(1).unwrap().count(), 0);
    }

    #[test]
    fn non_positive_numbers_are_rejected() {
        for n in [0, -1, i64::MIN] {
            assert_eq!(PrimeFactors::new(n).unwrap_err().code(), Code::InvalidArgument);
        }
    }

    #[test]
    fn handles_the_largest_input() {
        let factors: Vec<_> = PrimeFactors::new(i64::MAX).unwrap().collect();
        assert_eq!(factors, [7, 7, 73, 127, 337, 92_737, 649_657]);
    }

    #[test]
    fn steps_stop_at_the_budget() {
        let mut factors = PrimeFactors::new(999_983).unwrap();
        assert_eq!(factors.step(10), Step::Pending);
        assert_eq!(factors.step(TRIAL_BUDGET), Step::Factor(999_983));
        assert_eq!(factors.step(TRIAL_BUDGET), Step::Done);
    }

    #[test]
    fn average_of_a_few_numbers() {
        let mut avg = RunningAverage::default();
        for n in [5, 6, 7, 8] {
            avg.push(n).unwrap();
        }
        assert_eq!(avg.finish().unwrap(), 6.5);
    }

    #[test]
    fn average_of_nothing_is_invalid() {
        let err = RunningAverage::default().finish().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn running_maximum() {
        let mut max = RunningMaximum::default();
        let seen: Vec<f32> = [1.0, -1.0, 3.0, -4.0, 10.0, 5.0, 101.0, 52.0, 1010.0]
            .into_iter()
            .map(|n| max.observe(n))
            .collect();
        assert_eq!(seen, [1.0, 1.0, 3.0, 3.0, 10.0, 10.0, 101.0, 101.0, 1010.0]);
    }

    #[test]
    fn square_root_of_negative_is_invalid() {
        let err = square_root(-4).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.to_string().contains("Received a negative number: -4"));
        assert_eq!(square_root(16).unwrap(), 4.0);
    }

    #[tokio::test]
    async fn sum_does_not_overflow() {
        let req = Request::new(SumRequest {
            first_number: i32::MAX,
            second_number: i32::MAX,
        });
        let res = service().sum(req).await.unwrap().into_inner();
        assert_eq!(res.result, 2 * i64::from(i32::MAX));
    }

    #[tokio::test]
    async fn decomposition_streams_in_order() {
        let req = Request::new(PrimeNumberDecompositionRequest { number: 120 });
        let stream = service()
            .prime_number_decomposition(req)
            .await
            .unwrap()
            .into_inner();

        let factors: Vec<i64> = stream.map(|r| r.unwrap().factor).collect().await;
        assert_eq!(factors, [2, 2, 2, 3, 5]);
    }

    #[tokio::test]
    async fn decomposition_rejects_before_streaming() {
        let req = Request::new(PrimeNumberDecompositionRequest { number: 0 });
        let status = service().prime_number_decomposition(req).await.err().unwrap();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    // Real clock: a paused clock cannot advance while the producer computes.
    #[tokio::test]
    async fn decomposition_of_a_large_prime_honours_the_deadline() {
        let mut req = Request::new(PrimeNumberDecompositionRequest {
            number: 9_223_372_036_854_775_783,
        });
        req.metadata_mut().insert("grpc-timeout", "100m".parse().unwrap());

        let started = std::time::Instant::now();
        let mut stream = service()
            .prime_number_decomposition(req)
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().code(), Code::DeadlineExceeded);
        assert!(stream.next().await.is_none());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn average_waits_for_half_close() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("Average", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::iter([5, 6, 7, 8].map(|number| Ok(AverageRequest { number })));

        let res = average(&ctx, inbound).await.unwrap();
        assert_eq!(res.result, 6.5);
    }

    #[tokio::test]
    async fn average_of_empty_stream_is_invalid() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("Average", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::empty::<Result<AverageRequest, Status>>();

        let err = average(&ctx, inbound).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn find_maximum_answers_every_number() {
        let tracker = CallTracker::new();
        let ctx = tracker.begin("FindMaximum", &MetadataMap::new()).unwrap();
        let inbound = tokio_stream::iter(
            [1.0, -1.0, 3.0, -4.0, 10.0, 5.0, 101.0, 52.0, 1010.0]
                .map(|next_number| Ok(FindMaximumRequest { next_number })),
        );

        let maxima: Vec<f32> = spawn_duplex(ctx, 2, inbound, RunningMaximum::default())
            .map(|r| r.unwrap().current_max)
            .collect()
            .await;
        assert_eq!(maxima, [1.0, 1.0, 3.0, 3.0, 10.0, 10.0, 101.0, 101.0, 1010.0]);
    }
}

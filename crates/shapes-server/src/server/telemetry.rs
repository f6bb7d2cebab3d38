//! Logging, tracing and metrics.
//!
//! A `tracing_subscriber` fmt layer is always installed and filtered through
//! `RUST_LOG` (default `info`). Everything else is opt-in:
//!
//! | Feature   | Adds                                                        |
//! |-----------|-------------------------------------------------------------|
//! | `tracing` | an OpenTelemetry tracer fed by `tracing-opentelemetry`      |
//! | `metrics` | per-method call instruments (see below)                     |
//! | `stdout`  | stdout exporters for whichever of the two is enabled        |
//!
//! Handler spans are named after the RPC method. Streaming calls carry their
//! span into the task that produces responses, so events logged there are
//! exported as span events.
//!
//! ## Instruments
//!
//! Every instrument carries the `rpc.method` attribute.
//!
//! - `calls`: calls admitted by the tracker.
//! - `calls_inflight`: calls whose last task has not finished.
//! - `call_errors`: calls that ended with a non-OK status, refusals included.
//! - `call_duration` (ms): admission to release of the call guard.
//! - `messages_sent`: messages written to server streams.
//!
//! Without the `metrics` feature the recording functions are empty.
//!
//! ```bash
//! RUST_LOG=shapes_server=debug cargo run --features tracing,metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};

#[cfg(any(feature = "metrics", feature = "tracing"))]
const SERVICE_NAME: &str = "rpc-shapes";

/// Exporter handles kept alive for the life of the process.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending spans and metrics, then stops the exporters. Errors go
    /// to stderr since the subscriber may be torn down already.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        report("tracer", [
            self.tracer_provider.force_flush(),
            self.tracer_provider.shutdown(),
        ]);

        #[cfg(feature = "metrics")]
        report("meter", [
            self.meter_provider.force_flush(),
            self.meter_provider.shutdown(),
        ]);
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn report<E: core::fmt::Debug>(provider: &str, outcomes: [Result<(), E>; 2]) {
    for (step, outcome) in ["flush", "shutdown"].iter().zip(outcomes) {
        if let Err(err) = outcome {
            eprintln!("{provider} {step} failed: {err:?}");
        }
    }
}

/// Installs the global subscriber and, depending on features, the OTel
/// providers behind it.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let fmt = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    #[cfg(feature = "tracing")]
    let (registry, tracer_provider) = {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = tracer_provider();
        opentelemetry::global::set_tracer_provider(provider.clone());

        let layer = tracing_opentelemetry::layer()
            .with_tracer(provider.tracer_with_scope(scope.clone()))
            .with_error_records_to_exceptions(true);
        (registry.with(layer), provider)
    };

    #[cfg(feature = "metrics")]
    let (registry, meter_provider) = {
        let provider = meter_provider();
        opentelemetry::global::set_meter_provider(provider.clone());
        CallMetrics::install(opentelemetry::global::meter_with_scope(scope));

        let layer = tracing_opentelemetry::MetricsLayer::new(provider.clone());
        (registry.with(layer), provider)
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_batch_exporter(opentelemetry_stdout::SpanExporter::default());

    builder.build()
}

#[cfg(feature = "metrics")]
fn meter_provider() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(std::time::Duration::from_secs(5))
            .build(),
    );

    builder.build()
}

#[cfg(feature = "metrics")]
struct CallMetrics {
    calls: Counter<u64>,
    inflight: UpDownCounter<i64>,
    errors: Counter<u64>,
    duration_ms: Histogram<f64>,
    messages_sent: Counter<u64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<CallMetrics> = OnceLock::new();

#[cfg(feature = "metrics")]
impl CallMetrics {
    fn install(meter: Meter) {
        let _ = METRICS.set(Self {
            calls: meter
                .u64_counter("calls")
                .with_description("Calls admitted")
                .build(),
            inflight: meter
                .i64_up_down_counter("calls_inflight")
                .with_description("Calls still running")
                .build(),
            errors: meter
                .u64_counter("call_errors")
                .with_description("Calls that ended with a non-OK status")
                .build(),
            duration_ms: meter
                .f64_histogram("call_duration")
                .with_unit("ms")
                .with_description("Time from admission to release")
                .build(),
            messages_sent: meter
                .u64_counter("messages_sent")
                .with_description("Messages written to server streams")
                .build(),
        });
    }
}

/// Runs `$body` with the installed instruments and the method attribute.
/// Expands to nothing but a use of `$method` when metrics are off.
macro_rules! record {
    ($method:expr, |$m:ident, $attrs:ident| $body:expr) => {{
        #[cfg(feature = "metrics")]
        {
            if let Some($m) = METRICS.get() {
                let $attrs = &[KeyValue::new(semvcns::attribute::RPC_METHOD, $method)];
                $body;
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            let _ = $method;
        }
    }};
}

pub fn increment_calls(method: &'static str) {
    record!(method, |m, attrs| m.calls.add(1, attrs));
}

pub fn increment_calls_inflight(method: &'static str) {
    record!(method, |m, attrs| m.inflight.add(1, attrs));
}

pub fn decrement_calls_inflight(method: &'static str) {
    record!(method, |m, attrs| m.inflight.add(-1, attrs));
}

pub fn increment_call_errors(method: &'static str) {
    record!(method, |m, attrs| m.errors.add(1, attrs));
}

pub fn record_call_duration(method: &'static str, duration_ms: f64) {
    #[cfg(not(feature = "metrics"))]
    let _ = duration_ms;
    record!(method, |m, attrs| m.duration_ms.record(duration_ms, attrs));
}

pub fn increment_messages_sent(method: &'static str) {
    record!(method, |m, attrs| m.messages_sent.add(1, attrs));
}

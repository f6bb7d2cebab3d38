use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `shapes-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults that reproduce the canonical behavior
/// of every service: one greeting per second, three one-second steps for the
/// deadline demo.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shapes-server",
    version,
    about = "A gRPC service exercising every call shape plus document CRUD"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/shapes.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Capacity of the outbound queue of every streaming call.
    ///
    /// A producer that gets this far ahead of the client waits for the client
    /// to consume. A bidirectional call stops reading input while this many
    /// responses are queued.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds granted to in-flight calls to finish on shutdown before they
    /// are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Delay between two messages of `GreetManyTimes`, in milliseconds.
    ///
    /// Environment variable: `GREET_INTERVAL_MS`
    #[arg(long, env = "GREET_INTERVAL_MS", default_value_t = 1000)]
    pub greet_interval_ms: u64,

    /// Number of work steps `GreetWithDeadline` performs.
    ///
    /// Environment variable: `DEADLINE_STEPS`
    #[arg(long, env = "DEADLINE_STEPS", default_value_t = 3)]
    pub deadline_steps: u32,

    /// Duration of one `GreetWithDeadline` step, in milliseconds.
    ///
    /// Environment variable: `DEADLINE_STEP_MS`
    #[arg(long, env = "DEADLINE_STEP_MS", default_value_t = 1000)]
    pub deadline_step_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub greet_interval: Duration,
    pub deadline_steps: u32,
    pub deadline_step: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.deadline_steps == 0 {
            bail!("DEADLINE_STEPS must be greater than 0");
        }

        if args.server_addr.is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            greet_interval: Duration::from_millis(args.greet_interval_ms),
            deadline_steps: args.deadline_steps,
            deadline_step: Duration::from_millis(args.deadline_step_ms),
        })
    }
}

use clap::Parser;
use shapes_server::server::{
    config::{CliArgs, ServerConfig},
    lifecycle::{self, ListenAddr},
    store::memory::InMemoryStore,
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let handle = lifecycle::start(&config, Arc::new(InMemoryStore::new())).await?;
    log_startup_info(handle.local_addr(), &config);

    let signalled = shutdown_signal().await;
    let stopped = handle.shutdown().await;

    #[cfg(feature = "tracing")]
    match &stopped {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Error during service shutdown: {:?}", e),
    }

    providers.shutdown();
    signalled.and(stopped)
}

fn log_startup_info(_addr: &ListenAddr, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting shapes service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting shapes service on {} with a stream buffer of {}",
            _addr,
            _config.stream_buffer_size
        );
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        res = signal::ctrl_c() => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
            res?;
        },
        () = async {
            #[cfg(unix)]
            terminate.recv().await;
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        } => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
    Ok(())
}

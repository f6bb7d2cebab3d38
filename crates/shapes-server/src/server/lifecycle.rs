//! Starting and stopping the server.
//!
//! [`start`] binds the listener, registers the three services plus health
//! reporting and server reflection, and serves on a background task. The returned [`ServerHandle`]
//! owns everything the server holds: the listener (through the serve task),
//! the call tracker and the document store.
//!
//! ## Shutdown sequence
//!
//! 1. Health reports `NOT_SERVING` for every service.
//! 2. New calls are refused with `Unavailable`.
//! 3. In-flight calls get `shutdown_timeout` to finish or hit their own
//!    deadlines.
//! 4. Whatever is still running is cancelled.
//! 5. The transport stops and the listener is released.
//! 6. The store is closed (and the Unix socket file removed).
//!
//! Dropping a handle without calling [`ServerHandle::shutdown`] skips the
//! waiting: calls are cancelled, the serve task is aborted and the store is
//! closed in the background.

use crate::server::{
    config::ServerConfig,
    service::{
        ServiceSettings, calculator::CalculatorService, document::DocumentService,
        greet::GreetService,
    },
    store::DocumentStore,
    streaming::CallTracker,
};
use core::{fmt, net::SocketAddr, time::Duration};
use futures::Stream;
use shapes_core::proto::{
    FILE_DESCRIPTOR_SET, calculator::calculator_server::CalculatorServer,
    document::documents_server::DocumentsServer, greet::greeter_server::GreeterServer,
};
use std::{path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::server::HealthReporter;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Grace period given to cancelled calls to unwind before the transport stops.
const CANCEL_GRACE: Duration = Duration::from_millis(250);

type ServeResult = Result<(), tonic::transport::Error>;

/// Applies the same compression settings to every generated server.
macro_rules! compressed {
    ($server:expr) => {
        $server
            .send_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Deflate)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate)
    };
}

/// Where a running server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Uds(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Uds(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

struct Services {
    greeter: GreetService,
    calculator: CalculatorService,
    documents: DocumentService,
}

pub struct ServerHandle {
    addr: ListenAddr,
    tracker: CallTracker,
    health: HealthReporter,
    store: Arc<dyn DocumentStore>,
    shutdown_timeout: Duration,
    stop: Option<oneshot::Sender<()>>,
    serve: Option<JoinHandle<ServeResult>>,
}

/// Binds the configured address and starts serving in the background.
///
/// # Errors
///
/// Fails if the address cannot be bound, or if a Unix socket is requested on
/// a platform without them.
pub async fn start(
    config: &ServerConfig,
    store: Arc<dyn DocumentStore>,
) -> anyhow::Result<ServerHandle> {
    let tracker = CallTracker::new();
    let settings = ServiceSettings::from(config);
    let services = Services {
        greeter: GreetService::new(tracker.clone(), settings.clone()),
        calculator: CalculatorService::new(tracker.clone(), settings.clone()),
        documents: DocumentService::new(
            tracker.clone(),
            Arc::clone(&store),
            settings.stream_buffer_size,
        ),
    };

    let (stop, stop_rx) = oneshot::channel();

    let (addr, (health, serve)) = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;

            let path = PathBuf::from(&config.server_addr);
            let incoming = UnixListenerStream::new(UnixListener::bind(&path)?);
            (
                ListenAddr::Uds(path),
                spawn_serve(services, incoming, stop_rx).await?,
            )
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let listener = TcpListener::bind(&config.server_addr).await?;
        let addr = listener.local_addr()?;
        let incoming = TcpListenerStream::new(listener);
        (
            ListenAddr::Tcp(addr),
            spawn_serve(services, incoming, stop_rx).await?,
        )
    };

    Ok(ServerHandle {
        addr,
        tracker,
        health,
        store,
        shutdown_timeout: config.shutdown_timeout,
        stop: Some(stop),
        serve: Some(serve),
    })
}

/// Registers health reporting, reflection and the services, then serves
/// `incoming` until `stop` fires.
async fn spawn_serve<I, IO, IE>(
    services: Services,
    incoming: I,
    stop: oneshot::Receiver<()>,
) -> anyhow::Result<(HealthReporter, JoinHandle<ServeResult>)>
where
    I: Stream<Item = Result<IO, IE>> + Send + 'static,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError> + 'static,
{
    let (health, health_service) = tonic_health::server::health_reporter();
    health.set_serving::<GreeterServer<GreetService>>().await;
    health.set_serving::<CalculatorServer<CalculatorService>>().await;
    health.set_serving::<DocumentsServer<DocumentService>>().await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let router = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(compressed!(GreeterServer::new(services.greeter)))
        .add_service(compressed!(CalculatorServer::new(services.calculator)))
        .add_service(compressed!(DocumentsServer::new(services.documents)));

    let serve = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async {
        // A dropped sender stops the server too.
        let _ = stop.await;
    }));
    Ok((health, serve))
}

impl ServerHandle {
    pub const fn local_addr(&self) -> &ListenAddr {
        &self.addr
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Stops the server gracefully.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if serving failed, or the store's error
    /// if it could not be closed. The listener is released either way.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(in_flight = self.tracker.in_flight(), "shutting down");

        self.health
            .set_not_serving::<GreeterServer<GreetService>>()
            .await;
        self.health
            .set_not_serving::<CalculatorServer<CalculatorService>>()
            .await;
        self.health
            .set_not_serving::<DocumentsServer<DocumentService>>()
            .await;

        self.tracker.refuse_new();
        if !self.tracker.drain(self.shutdown_timeout).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                in_flight = self.tracker.in_flight(),
                "calls still running after {:?}, cancelling",
                self.shutdown_timeout
            );
            self.tracker.cancel_all();
            self.tracker.drain(CANCEL_GRACE).await;
        }

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let served = match self.serve.take() {
            Some(mut serve) => {
                match tokio::time::timeout(self.shutdown_timeout, &mut serve).await {
                    Ok(joined) => joined.map_err(anyhow::Error::from).and_then(|r| Ok(r?)),
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("transport did not stop in time, aborting");
                        serve.abort();
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        let closed = self.store.close().await;
        self.remove_socket_file();

        #[cfg(feature = "tracing")]
        tracing::info!("server stopped");

        served?;
        closed?;
        Ok(())
    }

    fn remove_socket_file(&self) {
        if let ListenAddr::Uds(path) = &self.addr {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };

        self.tracker.refuse_new();
        self.tracker.cancel_all();
        let _ = stop.send(());
        if let Some(serve) = self.serve.take() {
            serve.abort();
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            runtime.spawn(async move {
                let _ = store.close().await;
            });
        }
        self.remove_socket_file();
    }
}

//! TCP server.
//!
//! Accepts connections and runs each one through a freshly built pipeline
//! on its own task.

use crate::config::Config;
use crate::protocols::probe::VisitTrace;
use crate::runtime::{Connection, Direction, PipelineError, PipelineFactory};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, debug_span, error, info, warn, Instrument};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    factory: Arc<PipelineFactory>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance.
    ///
    /// Builds one pipeline up front so a bad stage list fails here rather
    /// than on the first connection.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let factory = PipelineFactory::from_config(&config);
        factory.build()?;

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            factory: Arc::new(factory),
            config,
        })
    }

    /// Bind the configured address.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = resolve(&self.config.listen_addr())?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %listener.local_addr()?, "Server listening");
        Ok(listener)
    }

    /// Start the server and accept connections until Ctrl-C.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accept connections on `listener` until `shutdown` completes.
    ///
    /// Connections already running are left to finish on their own.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => {
                    permit.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
                }
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            configure_stream(&stream);

            let trace = self.factory.has_probes().then(VisitTrace::new);
            let pipeline = match self.factory.build_with_trace(trace.as_ref()) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!(error = %e, "Failed to build pipeline");
                    continue;
                }
            };

            let connection = Connection::new(stream, pipeline)
                .with_idle_timeout(self.config.idle_timeout());
            let span = debug_span!("connection", peer = %peer);

            tokio::spawn(
                async move {
                    debug!("New connection");
                    match connection.run().await {
                        Ok(reason) => debug!(?reason, "Connection closed"),
                        Err(e) if e.is_connection_fatal() => debug!(error = %e, "Connection error"),
                        Err(e) => warn!(error = %e, "Pipeline misused"),
                    }
                    if let Some(trace) = trace {
                        debug!(
                            inbound = ?trace.stages(Direction::Inbound),
                            outbound = ?trace.stages(Direction::Outbound),
                            "Probe propagation order"
                        );
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }

        info!("Shutdown signal received, no longer accepting connections");
        Ok(())
    }
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address resolved for '{addr}'"),
        )
    })
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Failed to set TCP_NODELAY");
    }
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        warn!(error = %e, "Failed to set SO_KEEPALIVE");
    }
}

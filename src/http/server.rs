//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Run the accept loop for one listener (plain or TLS)
//! - Register every accepted connection with the shared registry
//! - Serve HTTP/1.1 with keep-alive, dispatching to an Axum router
//! - Attach in-flight responses to their connection
//! - Drop a connection's socket when it is destroyed
//! - Stop accepting and wait for connections to end on `close`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::http::response::InFlightGuard;
use crate::lifecycle::registry::ConnectionRegistry;
use crate::lifecycle::terminator::ShutdownTarget;
use crate::net::connection::{Connection, ConnectionKind, ConnectionTracker, ServerId, SocketHandle};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls::{load_tls_acceptor, TlsError};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `close` was called on a server that is not listening.
    #[error("server is not running")]
    NotRunning,
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("accept loop failed: {0}")]
    AcceptLoop(#[from] tokio::task::JoinError),
}

/// A running HTTP server bound to one listener.
///
/// The accept loop runs in a background task; dropping the last handle stops it.
#[derive(Debug)]
pub struct HttpServer {
    id: ServerId,
    kind: ConnectionKind,
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    stop_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    listening: AtomicBool,
}

impl HttpServer {
    /// Bind the configured listener (loading TLS material if configured) and start serving.
    pub async fn bind(
        config: &ListenerConfig,
        router: Router,
        registry: ConnectionRegistry,
    ) -> Result<Arc<Self>, ServerError> {
        let tls = match &config.tls {
            Some(tls) => Some(load_tls_acceptor(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            None => None,
        };
        let listener = Listener::bind(config).await?;
        Self::serve(listener, tls, router, registry)
    }

    /// Start serving on an already bound listener. Must be called within a Tokio runtime.
    pub fn serve(
        listener: Listener,
        tls: Option<TlsAcceptor>,
        router: Router,
        registry: ConnectionRegistry,
    ) -> Result<Arc<Self>, ServerError> {
        let local_addr = listener.local_addr()?;
        let kind = if tls.is_some() {
            ConnectionKind::Secure
        } else {
            ConnectionKind::Plain
        };
        let (stop_tx, stop_rx) = watch::channel(false);

        let server = Arc::new(Self {
            id: ServerId::new(),
            kind,
            local_addr,
            tracker: ConnectionTracker::new(),
            stop_tx,
            accept_task: Mutex::new(None),
            listening: AtomicBool::new(true),
        });

        let accept_loop = AcceptLoop {
            server_id: server.id,
            kind,
            listener,
            tls,
            router,
            registry,
            tracker: server.tracker.clone(),
            stop_rx,
        };
        let task = tokio::spawn(accept_loop.run());
        *server.accept_task.lock().expect("accept task mutex poisoned") = Some(task);

        tracing::info!(
            server_id = %server.id,
            address = %local_addr,
            %kind,
            "HTTP server started"
        );
        Ok(server)
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False as soon as `close` has begun.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Number of connections accepted by this server that are still open.
    pub fn active_connections(&self) -> usize {
        self.tracker.active_count()
    }

    /// Stop accepting connections, then wait until every open connection has ended.
    ///
    /// Does not close keep-alive connections by itself.
    pub async fn close(&self) -> Result<(), ServerError> {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return Err(ServerError::NotRunning);
        }

        tracing::info!(
            server_id = %self.id,
            address = %self.local_addr,
            active_connections = self.tracker.active_count(),
            "HTTP server closing"
        );
        self.stop_tx.send_replace(true);

        let task = self.accept_task.lock().expect("accept task mutex poisoned").take();
        if let Some(task) = task {
            task.await?;
        }

        self.tracker.wait_idle().await;
        tracing::info!(server_id = %self.id, "HTTP server closed");
        Ok(())
    }
}

impl ShutdownTarget for HttpServer {
    fn server_id(&self) -> ServerId {
        self.id
    }

    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ServerError>> {
        Box::pin(HttpServer::close(self))
    }
}

struct AcceptLoop {
    server_id: ServerId,
    kind: ConnectionKind,
    listener: Listener,
    tls: Option<TlsAcceptor>,
    router: Router,
    registry: ConnectionRegistry,
    tracker: ConnectionTracker,
    stop_rx: watch::Receiver<bool>,
}

impl AcceptLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => self.spawn_connection(stream, peer_addr, permit),
                    Err(ListenerError::LimitClosed) => break,
                    Err(e) => {
                        tracing::warn!(server_id = %self.server_id, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        // Dropping the listener here releases the listening socket.
        tracing::debug!(server_id = %self.server_id, "Accept loop stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        let (socket, destroy_rx) = SocketHandle::new(self.server_id, self.kind, peer_addr);
        let guard = self.tracker.track(socket.id());
        let observer = self.registry.track(socket.clone(), self.kind);
        // Checked after tracking: either the terminator's snapshot sees this connection,
        // or the stop flag is already visible here.
        if *self.stop_rx.borrow() {
            tracing::debug!(server_id = %self.server_id, %peer_addr, "Dropping connection accepted during close");
            drop((observer, guard, permit));
            return;
        }
        let tls = self.tls.clone();
        let router = self.router.clone();

        tokio::spawn(async move {
            // Locals drop in reverse: registry entry first, then the server's count, then the slot.
            let _permit = permit;
            let _guard = guard;
            let _observer = observer;

            match tls {
                None => serve_connection(TokioIo::new(stream), socket, router, destroy_rx).await,
                Some(acceptor) => {
                    let mut destroy_rx = destroy_rx;
                    let handshake = tokio::select! {
                        result = acceptor.accept(stream) => result,
                        _ = destroyed(&mut destroy_rx) => {
                            tracing::debug!(peer_addr = %peer_addr, "Connection destroyed during TLS handshake");
                            return;
                        }
                    };
                    match handshake {
                        Ok(stream) => {
                            serve_connection(TokioIo::new(stream), socket, router, destroy_rx).await
                        }
                        Err(e) => {
                            tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed")
                        }
                    }
                }
            }
        });
    }
}

async fn serve_connection<I>(
    io: TokioIo<I>,
    socket: Arc<SocketHandle>,
    router: Router,
    mut destroy_rx: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = {
        let socket = socket.clone();
        service_fn(move |request: Request<Incoming>| {
            let guard = InFlightGuard::begin(socket.clone());
            let router = router.clone();
            async move {
                let response = router
                    .oneshot(request)
                    .await
                    .unwrap_or_else(|never| match never {});
                Ok::<_, Infallible>(guard.finish(response))
            }
        })
    };

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .keep_alive(true)
        .serve_connection(io, service);

    tokio::select! {
        result = conn => {
            if let Err(e) = result {
                tracing::debug!(connection_id = %socket.id(), error = %e, "Connection error");
            }
        }
        _ = destroyed(&mut destroy_rx) => {
            tracing::debug!(
                connection_id = %socket.id(),
                peer_addr = %socket.peer_addr(),
                "Connection destroyed"
            );
        }
    }
}

/// Resolves once the connection's handle has been destroyed.
async fn destroyed(destroy_rx: &mut watch::Receiver<bool>) {
    // The sender lives in the socket handle, which outlives this wait.
    let _ = destroy_rx.wait_for(|destroyed| *destroyed).await;
}

//! Two-phase server termination.
//!
//! # Protocol
//! ```text
//! terminate()
//!     → server.close() begins (stop accepting)
//!     → cooperative pass over the server's connections:
//!           in flight, head not sent → add `connection: close`
//!           in flight, head sent     → leave alone
//!           idle                     → destroy now
//!     → race close completion against the timeout
//!           close wins     → its result is the outcome
//!           deadline wins  → destroy every remaining connection,
//!                            then give close a short grace period
//! ```
//!
//! The deadline never surfaces as an error; it only escalates to forced destruction.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use hyper::header::{HeaderValue, CONNECTION};
use tokio::time::Instant;

use crate::config::{validate_shutdown, ShutdownConfig, ValidationError};
use crate::http::server::ServerError;
use crate::lifecycle::registry::ConnectionRegistry;
use crate::net::connection::{Connection, ConnectionKind, ServerId};
use crate::observability::metrics::{self, DestroyPhase};

/// A listening server that can be shut down.
pub trait ShutdownTarget: Send + Sync {
    fn server_id(&self) -> ServerId;

    /// Whether the server accepts plain or encrypted connections.
    fn kind(&self) -> ConnectionKind;

    /// Stop accepting connections. Resolves once the server reports closed,
    /// which happens only after all of its connections are gone.
    fn close(&self) -> BoxFuture<'_, Result<(), ServerError>>;
}

/// Error type for termination.
#[derive(Debug, thiserror::Error)]
pub enum TerminateError {
    /// Rejected shutdown options. Only produced when a terminator is created.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),
    /// The server's own close operation failed.
    #[error("server close failed: {0}")]
    ListenerClose(#[source] ServerError),
}

enum Race {
    Closed(Result<(), ServerError>),
    DeadlineExceeded,
}

/// Shuts down one server, bounded by a timeout.
pub struct Terminator<S: ?Sized> {
    server: Arc<S>,
    registry: ConnectionRegistry,
    timeout: Duration,
    force_close_grace: Duration,
}

impl<S: ?Sized> Clone for Terminator<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            registry: self.registry.clone(),
            timeout: self.timeout,
            force_close_grace: self.force_close_grace,
        }
    }
}

impl<S> Terminator<S>
where
    S: ShutdownTarget + ?Sized + 'static,
{
    /// Validate the options and prepare a terminator. Nothing is registered or started.
    pub fn new(
        server: Arc<S>,
        registry: ConnectionRegistry,
        options: &ShutdownConfig,
    ) -> Result<Self, TerminateError> {
        let timeout = validate_shutdown(options)?;
        Ok(Self {
            server,
            registry,
            timeout,
            force_close_grace: Duration::from_millis(options.force_close_grace_ms),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A `'static` future running [`terminate`](Self::terminate).
    pub fn trigger(&self) -> BoxFuture<'static, Result<(), TerminateError>> {
        let this = self.clone();
        async move { this.terminate().await }.boxed()
    }

    /// Run the shutdown protocol once.
    pub async fn terminate(&self) -> Result<(), TerminateError> {
        let started = Instant::now();
        let server_id = self.server.server_id();
        tracing::info!(
            %server_id,
            kind = %self.server.kind(),
            timeout_ms = self.timeout.as_millis() as u64,
            "Terminating server"
        );

        let mut closing = self.server.close();
        // Poll once so the server has stopped accepting before connections are inspected.
        let early = (&mut closing).now_or_never();
        self.cooperative_pass(server_id);

        let race = match early {
            Some(result) => Race::Closed(result),
            None => tokio::select! {
                result = &mut closing => Race::Closed(result),
                _ = tokio::time::sleep(self.timeout) => Race::DeadlineExceeded,
            },
        };

        let (result, outcome) = match race {
            Race::Closed(result) => (result.map_err(TerminateError::ListenerClose), "graceful"),
            Race::DeadlineExceeded => {
                tracing::warn!(
                    %server_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Shutdown timeout exceeded, destroying remaining connections"
                );
                self.forced_pass(server_id);
                let result = match tokio::time::timeout(self.force_close_grace, closing).await {
                    Ok(result) => result.map_err(TerminateError::ListenerClose),
                    Err(_) => {
                        tracing::warn!(
                            %server_id,
                            grace_ms = self.force_close_grace.as_millis() as u64,
                            "Server did not report closed after forced destruction"
                        );
                        Ok(())
                    }
                };
                (result, "forced")
            }
        };

        match &result {
            Ok(()) => tracing::info!(
                %server_id,
                outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Server terminated"
            ),
            Err(e) => tracing::error!(%server_id, outcome, error = %e, "Server termination failed"),
        }
        metrics::record_shutdown(if result.is_ok() { outcome } else { "error" }, started.into_std());
        result
    }

    fn cooperative_pass(&self, server_id: ServerId) {
        for kind in [ConnectionKind::Secure, ConnectionKind::Plain] {
            for connection in self.registry.snapshot_owned_by(kind, server_id) {
                match connection.in_flight() {
                    Some(response) => {
                        if response.set_header(CONNECTION, HeaderValue::from_static("close")) {
                            tracing::debug!(
                                connection_id = %connection.id(),
                                %kind,
                                "Marked in-flight response to close the connection"
                            );
                        }
                    }
                    None => {
                        self.registry.remove(connection.id(), kind);
                        self.destroy(connection.as_ref(), kind, DestroyPhase::Cooperative);
                    }
                }
            }
        }
    }

    fn forced_pass(&self, server_id: ServerId) {
        for kind in [ConnectionKind::Plain, ConnectionKind::Secure] {
            for connection in self.registry.snapshot_owned_by(kind, server_id) {
                self.destroy(connection.as_ref(), kind, DestroyPhase::Forced);
                self.registry.remove(connection.id(), kind);
            }
        }
    }

    /// Best effort: a failure is logged and the pass continues.
    fn destroy(&self, connection: &dyn Connection, kind: ConnectionKind, phase: DestroyPhase) {
        match connection.destroy() {
            Ok(()) => {
                metrics::record_destroyed(kind, phase);
                tracing::debug!(connection_id = %connection.id(), %kind, phase = phase.as_str(), "Connection destroyed");
            }
            Err(e) => tracing::warn!(
                connection_id = %connection.id(),
                %kind,
                phase = phase.as_str(),
                error = %e,
                "Failed to destroy connection"
            ),
        }
    }
}

/// Validate `options` and return a zero-argument shutdown trigger for `server`.
///
/// Every call of the trigger runs the shutdown protocol and resolves with its outcome.
pub fn create_terminator<S>(
    server: Arc<S>,
    registry: ConnectionRegistry,
    options: &ShutdownConfig,
) -> Result<impl Fn() -> BoxFuture<'static, Result<(), TerminateError>> + Send + Sync + 'static, TerminateError>
where
    S: ShutdownTarget + ?Sized + 'static,
{
    let terminator = Terminator::new(server, registry, options)?;
    Ok(move || terminator.trigger())
}

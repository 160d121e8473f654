//! Shutdown of several servers at once.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::config::ShutdownConfig;
use crate::lifecycle::registry::ConnectionRegistry;
use crate::lifecycle::terminator::{ShutdownTarget, TerminateError, Terminator};

/// Terminate every server concurrently. All terminations run to completion; the first
/// error (in server order) is returned.
///
/// Options are validated for every server before any of them is touched.
pub async fn shutdown_all<S>(
    servers: &[Arc<S>],
    registry: &ConnectionRegistry,
    options: &ShutdownConfig,
) -> Result<(), TerminateError>
where
    S: ShutdownTarget + ?Sized + 'static,
{
    let terminators = servers
        .iter()
        .map(|server| Terminator::new(Arc::clone(server), registry.clone(), options))
        .collect::<Result<Vec<_>, _>>()?;

    let results = join_all(terminators.iter().map(|terminator| terminator.terminate())).await;
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes;
    use crate::http::server::HttpServer;
    use crate::net::listener::Listener;

    async fn server(registry: &ConnectionRegistry) -> Arc<HttpServer> {
        let listener = Listener::from_tcp(
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(),
            16,
        )
        .unwrap();
        HttpServer::serve(listener, None, routes::router(), registry.clone()).unwrap()
    }

    #[tokio::test]
    async fn closes_every_server() {
        let registry = ConnectionRegistry::new();
        let servers = vec![server(&registry).await, server(&registry).await];

        shutdown_all(&servers, &registry, &ShutdownConfig::with_timeout_ms(1000.0))
            .await
            .unwrap();
        assert!(servers.iter().all(|s| !s.is_listening()));
    }

    #[tokio::test]
    async fn invalid_options_touch_nothing() {
        let registry = ConnectionRegistry::new();
        let servers = vec![server(&registry).await];

        let err = shutdown_all(&servers, &registry, &ShutdownConfig::with_timeout_ms(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TerminateError::InvalidArgument(_)));
        assert!(servers[0].is_listening());
        servers[0].close().await.unwrap();
    }

    #[tokio::test]
    async fn second_shutdown_reports_not_running() {
        let registry = ConnectionRegistry::new();
        let servers = vec![server(&registry).await];
        let options = ShutdownConfig::with_timeout_ms(1000.0);

        shutdown_all(&servers, &registry, &options).await.unwrap();
        let err = shutdown_all(&servers, &registry, &options).await.unwrap_err();
        assert!(matches!(
            err,
            TerminateError::ListenerClose(crate::http::server::ServerError::NotRunning)
        ));
    }
}

//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: any listener that cannot start aborts startup
//! - Every server shares one registry

use std::sync::Arc;

use axum::Router;

use crate::config::ListenerConfig;
use crate::http::server::{HttpServer, ServerError};
use crate::lifecycle::registry::ConnectionRegistry;

/// Start one server per configured listener.
///
/// Servers started before a failure are closed again before the error is returned.
pub async fn start_servers(
    listeners: &[ListenerConfig],
    router: Router,
    registry: &ConnectionRegistry,
) -> Result<Vec<Arc<HttpServer>>, ServerError> {
    let mut servers = Vec::with_capacity(listeners.len());
    for config in listeners {
        match HttpServer::bind(config, router.clone(), registry.clone()).await {
            Ok(server) => servers.push(server),
            Err(e) => {
                tracing::error!(bind_address = %config.bind_address, error = %e, "Failed to start listener");
                for server in &servers {
                    let _ = server.close().await;
                }
                return Err(e);
            }
        }
    }
    Ok(servers)
}

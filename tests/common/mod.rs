//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use server_terminator::http::routes;
use server_terminator::net::connection::ConnectionKind;
use server_terminator::net::{load_tls_acceptor, Listener};
use server_terminator::{ConnectionRegistry, HttpServer};
use tokio::net::TcpListener;

pub const KINDS: [ConnectionKind; 2] = [ConnectionKind::Plain, ConnectionKind::Secure];

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Start a server of the given kind on an ephemeral port with the built-in routes.
pub async fn start_server(kind: ConnectionKind, registry: &ConnectionRegistry) -> Arc<HttpServer> {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 64).unwrap();
    let tls = match kind {
        ConnectionKind::Plain => None,
        ConnectionKind::Secure => {
            Some(load_tls_acceptor(&fixture("cert.pem"), &fixture("key.pem")).unwrap())
        }
    };
    let server = HttpServer::serve(listener, tls, routes::router(), registry.clone()).unwrap();
    assert!(server.is_listening());
    server
}

/// Base URL for a server, with the scheme matching its kind.
pub fn url(server: &HttpServer, path: &str) -> String {
    let scheme = match server.kind() {
        ConnectionKind::Plain => "http",
        ConnectionKind::Secure => "https",
    };
    format!("{}://{}{}", scheme, server.local_addr(), path)
}

/// Keep-alive client that trusts the self-signed test certificate.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub async fn refuses_connections(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_err()
}

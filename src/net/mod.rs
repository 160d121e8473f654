//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (SocketHandle, registered with the registry)
//!     → tls.rs (optional TLS handshake)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection is tracked from accept until its socket is dropped
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{
    Connection, ConnectionGuard, ConnectionId, ConnectionKind, ConnectionTracker, InFlightResponse,
    ServerId, SocketHandle,
};
pub use listener::{Listener, ListenerError};
pub use tls::{load_tls_acceptor, TlsError};

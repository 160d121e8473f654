//! Graceful, time-bounded termination of HTTP and HTTPS servers.
//!
//! Servers register every accepted connection in a shared [`ConnectionRegistry`].
//! A [`Terminator`] stops a server from accepting, lets in-flight exchanges finish
//! with `connection: close`, destroys idle keep-alive connections at once, and
//! destroys whatever is left when its timeout runs out.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{AppConfig, ShutdownConfig};
pub use http::HttpServer;
pub use lifecycle::{create_terminator, ConnectionRegistry, ShutdownTarget, TerminateError, Terminator};

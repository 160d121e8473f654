//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, hyper HTTP/1.1, registry tracking)
//!     → response.rs (attach in-flight response to the connection)
//!     → routes.rs (Axum handlers)
//!     → response.rs (seal head, detach when the body is done)
//!     → Send to client
//! ```

pub mod response;
pub mod routes;
pub mod server;

pub use response::{InFlightGuard, ResponseSlot};
pub use server::{HttpServer, ServerError};

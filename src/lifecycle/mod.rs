//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → bind listeners → servers share one registry
//!
//! Registry (registry.rs):
//!     accept → track(conn, kind) ... socket closed → observer removes entry
//!
//! Termination (terminator.rs):
//!     close server ∥ cooperative pass → race against timeout → forced pass on deadline
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown.rs terminates every server
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit object injected into servers and terminators
//! - Terminators only touch connections owned by their server
//! - Shutdown has a timeout: forced destruction after the deadline

pub mod registry;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod terminator;

pub use registry::{CloseObserver, ConnectionRegistry};
pub use shutdown::shutdown_all;
pub use terminator::{create_terminator, ShutdownTarget, TerminateError, Terminator};

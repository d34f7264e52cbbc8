//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, TraceLayer)
//!     → middleware.rs (exclusion check, InstrumenterId, request event)
//!     → TimeoutLayer
//!     → application handlers (may instrument nested operations)
//!     → response returned unchanged
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{InstrumentLayer, InstrumentService};
pub use server::{AppState, HttpServer};

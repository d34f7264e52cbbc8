//! Notification subsystem.
//!
//! # Data Flow
//! ```text
//! bus.instrument(name, payload, body)
//!     → body runs on the caller's stack
//!     → event.rs (Event built from name, payload, timing, outcome)
//!     → bus.rs publish (every matching listener, registration order)
//!     → body's result returned / failure re-raised unchanged
//! ```
//!
//! # Design Decisions
//! - Synchronous: the bus never spawns or queues
//! - Nested `instrument` calls publish child before parent
//! - Correlation via InstrumenterId scoped to one request, not parent links
//! - Listener failures are isolated, logged and never reach the caller

pub mod bus;
pub mod event;
pub mod instrumenter;

pub use bus::{BoxError, Listener, NotificationBus, SubscriptionId};
pub use event::{Event, Failure, Payload};
pub use instrumenter::InstrumenterId;

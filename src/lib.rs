//! Request instrumentation library.
//!
//! Wraps inbound requests in named events, publishes them on a synchronous
//! notification bus and filters each event's payload through a per-event
//! policy registry before it is handed to a record sink.

pub mod config;
pub mod filters;
pub mod http;
pub mod lifecycle;
pub mod notifications;
pub mod observability;
pub mod sink;

pub use config::AppConfig;
pub use filters::{FilterSpec, PayloadFilterRegistry};
pub use http::{HttpServer, InstrumentLayer};
pub use lifecycle::Shutdown;
pub use notifications::{Event, InstrumenterId, NotificationBus, Payload};

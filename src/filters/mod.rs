//! Payload filtering subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     defaults.rs (seed policies)
//!     → application register/unregister calls
//!     → registry.rs (copy-on-write snapshot)
//!
//! Per event:
//!     registry.filter(name, payload)
//!     → spec.rs FilterSpec::apply
//!     → new payload (input never mutated)
//! ```
//!
//! # Design Decisions
//! - Disclosure is opt-in: an unregistered event keeps no fields
//! - One live registry; every operation goes through the same snapshot
//! - A broken transform only affects its own event type

pub mod defaults;
pub mod registry;
pub mod spec;

pub use registry::{FilterError, PayloadFilterRegistry};
pub use spec::FilterSpec;

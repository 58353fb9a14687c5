//! # Lifecycle Events
//!
//! Explicit typed publish after commit; no implicit observer fan-out.

pub mod publisher;

pub use publisher::{DocumentEvent, EventPublisher};

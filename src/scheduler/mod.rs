//! # Retry Scheduling
//!
//! Decides whether and when a failed dispatch is re-attempted.

pub mod backoff;

pub use backoff::{RetryDecision, RetryPolicy};

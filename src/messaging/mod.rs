//! # Message Channels
//!
//! Queue names, payloads and the pgmq-backed client connecting the pipeline
//! stages with at-least-once, ack-after-commit semantics.

pub mod errors;
pub mod message;
pub mod pgmq_client;

pub use errors::{MessagingError, MessagingResult};
pub use message::{DocumentMessage, QueueName};
pub use pgmq_client::PgmqClient;

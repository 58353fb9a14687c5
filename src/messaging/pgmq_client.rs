//! # PostgreSQL Message Queue Client
//!
//! Thin wrapper over the pgmq crate scoped to this crate's channels. pgmq
//! gives the semantics the pipeline needs without a separate broker:
//! visibility timeouts make delivery at-least-once (an unacknowledged message
//! reappears), and `send_delay` suspends a message instead of a worker for
//! the retry tiers.

use pgmq::{types::Message, PGMQueue};
use std::time::Duration;
use tracing::{debug, info};

use super::errors::{MessagingError, MessagingResult};
use super::message::QueueName;

#[derive(Clone)]
pub struct PgmqClient {
    pgmq: PGMQueue,
}

impl PgmqClient {
    /// Connect using a connection string
    pub async fn new(database_url: &str) -> MessagingResult<Self> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self { pgmq })
    }

    /// Reuse an existing connection pool
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    /// Create every pipeline channel that does not exist yet
    pub async fn ensure_queues(&self) -> MessagingResult<()> {
        for queue in QueueName::all() {
            self.pgmq.create(queue.as_str()).await.map_err(|e| {
                MessagingError::queue_operation(queue.as_str(), "create", e.to_string())
            })?;
            debug!(queue = %queue, "queue ready");
        }
        info!("pipeline queues ready");
        Ok(())
    }

    /// Enqueue for immediate delivery
    pub async fn send<T: serde::Serialize + Sync>(
        &self,
        queue: QueueName,
        message: &T,
    ) -> MessagingResult<i64> {
        let message_id = self
            .pgmq
            .send(queue.as_str(), message)
            .await
            .map_err(|e| MessagingError::queue_operation(queue.as_str(), "send", e.to_string()))?;
        debug!(queue = %queue, message_id, "message enqueued");
        Ok(message_id)
    }

    /// Enqueue with delayed visibility; the message stays invisible until the
    /// delay elapses
    pub async fn send_delayed<T: serde::Serialize + Sync>(
        &self,
        queue: QueueName,
        message: &T,
        delay: Duration,
    ) -> MessagingResult<i64> {
        let message_id = self
            .pgmq
            .send_delay(queue.as_str(), message, delay.as_secs())
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue.as_str(), "send_delay", e.to_string())
            })?;
        debug!(queue = %queue, message_id, delay_secs = delay.as_secs(), "delayed message enqueued");
        Ok(message_id)
    }

    /// Read a batch, making each message invisible for `visibility_timeout`
    pub async fn read_batch(
        &self,
        queue: QueueName,
        visibility_timeout: i32,
        limit: i32,
    ) -> MessagingResult<Vec<Message<serde_json::Value>>> {
        let messages = self
            .pgmq
            .read_batch(queue.as_str(), Some(visibility_timeout), limit)
            .await
            .map_err(|e| MessagingError::queue_operation(queue.as_str(), "read", e.to_string()))?
            .unwrap_or_default();
        Ok(messages)
    }

    /// Acknowledge: remove the message for good
    pub async fn delete(&self, queue: QueueName, message_id: i64) -> MessagingResult<()> {
        self.pgmq
            .delete(queue.as_str(), message_id)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue.as_str(), "delete", e.to_string())
            })?;
        Ok(())
    }

    /// Move a message to the archive table instead of deleting it
    pub async fn archive(&self, queue: QueueName, message_id: i64) -> MessagingResult<()> {
        self.pgmq
            .archive(queue.as_str(), message_id)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue.as_str(), "archive", e.to_string())
            })?;
        Ok(())
    }
}

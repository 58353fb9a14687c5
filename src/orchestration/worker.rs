//! # Queue Workers
//!
//! Consumer loops over the pipeline channels. Workers read batches, hand each
//! message to the pipeline, then enact its disposition: followups are
//! enqueued and the message deleted on ack; nacked or failing messages are
//! left to reappear after the visibility timeout.

use pgmq::types::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::pipeline::{Disposition, DocumentPipeline};
use crate::config::WorkerConfig;
use crate::messaging::{DocumentMessage, PgmqClient, QueueName};

pub struct DeliveryWorker {
    pipeline: Arc<DocumentPipeline>,
    queues: PgmqClient,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl DeliveryWorker {
    pub fn new(
        pipeline: Arc<DocumentPipeline>,
        queues: PgmqClient,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pipeline,
            queues,
            config,
            shutdown,
        }
    }

    /// Run consumer loops for every pipeline channel until shutdown
    pub async fn run(self) {
        info!("delivery worker starting");

        let mut consumers = Vec::new();
        for queue in QueueName::send_channels() {
            consumers.push(self.consume_loop(queue));
        }
        consumers.push(self.consume_loop(QueueName::CheckTicket));

        futures::future::join_all(consumers).await;
        info!("delivery worker stopped");
    }

    async fn consume_loop(&self, queue: QueueName) {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                debug!(queue = %queue, "consumer shutting down");
                break;
            }

            let messages = match self
                .queues
                .read_batch(
                    queue,
                    self.config.visibility_timeout_secs,
                    self.config.batch_size,
                )
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    error!(queue = %queue, error = %e, "queue read failed");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.poll_interval_ms,
                    ))
                    .await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(self.config.poll_interval_ms)) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for message in messages {
                self.process_message(queue, message).await;
            }
        }
    }

    async fn process_message(&self, queue: QueueName, message: Message<serde_json::Value>) {
        let message_id = message.msg_id;

        let payload: DocumentMessage = match serde_json::from_value(message.message) {
            Ok(payload) => payload,
            Err(e) => {
                // Poison message: archive it so the channel keeps moving
                warn!(queue = %queue, message_id, error = %e, "unreadable message archived");
                if let Err(e) = self.queues.archive(queue, message_id).await {
                    error!(queue = %queue, message_id, error = %e, "archive failed");
                }
                return;
            }
        };

        let outcome = match queue {
            QueueName::CheckTicket => self.pipeline.handle_ticket_check(&payload).await,
            _ => self.pipeline.handle_send(&payload).await,
        };

        match outcome {
            Ok(Disposition::Ack { followups }) => {
                for followup in followups {
                    let sent = match followup.delay {
                        Some(delay) => {
                            self.queues
                                .send_delayed(followup.queue, &followup.message, delay)
                                .await
                        }
                        None => self.queues.send(followup.queue, &followup.message).await,
                    };
                    if let Err(e) = sent {
                        // Leave the original unacknowledged; reprocessing is
                        // idempotent and will re-emit the followup.
                        error!(queue = %followup.queue, message_id, error = %e, "followup enqueue failed");
                        return;
                    }
                }
                if let Err(e) = self.queues.delete(queue, message_id).await {
                    error!(queue = %queue, message_id, error = %e, "ack failed");
                }
            }
            Ok(Disposition::Nack { reason }) => {
                warn!(queue = %queue, message_id, reason = %reason, "message left for redelivery");
            }
            Err(e) => {
                error!(queue = %queue, message_id, error = %e, "processing failed, message left for redelivery");
            }
        }
    }
}

//! # Queue Messages
//!
//! Message formats and channel names for the queue-driven pipeline. Every
//! channel carries the same payload: a document id plus the retry count the
//! message was enqueued with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Channels the pipeline consumes and produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Entry point: deliver a document
    SendDocument,
    /// Delayed re-delivery tiers for transport failures
    RetryTier1,
    RetryTier2,
    RetryTier3,
    /// Poll an issued ticket
    CheckTicket,
    /// Terminal failures, kept for audit consumers
    ErrorAudit,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendDocument => "send_document",
            Self::RetryTier1 => "retry_tier_1",
            Self::RetryTier2 => "retry_tier_2",
            Self::RetryTier3 => "retry_tier_3",
            Self::CheckTicket => "check_ticket",
            Self::ErrorAudit => "error_audit",
        }
    }

    /// Retry tier channel for an attempt number (1-based)
    pub fn retry_tier(tier: u8) -> Option<Self> {
        match tier {
            1 => Some(Self::RetryTier1),
            2 => Some(Self::RetryTier2),
            3 => Some(Self::RetryTier3),
            _ => None,
        }
    }

    /// Channels that feed the send pipeline (entry plus the retry tiers)
    pub fn send_channels() -> [Self; 4] {
        [
            Self::SendDocument,
            Self::RetryTier1,
            Self::RetryTier2,
            Self::RetryTier3,
        ]
    }

    pub fn all() -> [Self; 6] {
        [
            Self::SendDocument,
            Self::RetryTier1,
            Self::RetryTier2,
            Self::RetryTier3,
            Self::CheckTicket,
            Self::ErrorAudit,
        ]
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload carried by every channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMessage {
    pub document_id: Uuid,
    /// Retry count at enqueue time, for observability
    pub retry_count: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl DocumentMessage {
    pub fn new(document_id: Uuid) -> Self {
        Self {
            document_id,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_retry_count(document_id: Uuid, retry_count: i32) -> Self {
        Self {
            document_id,
            retry_count,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(QueueName::SendDocument.as_str(), "send_document");
        assert_eq!(QueueName::RetryTier2.as_str(), "retry_tier_2");
        assert_eq!(QueueName::ErrorAudit.to_string(), "error_audit");
    }

    #[test]
    fn test_retry_tier_lookup() {
        assert_eq!(QueueName::retry_tier(1), Some(QueueName::RetryTier1));
        assert_eq!(QueueName::retry_tier(3), Some(QueueName::RetryTier3));
        assert_eq!(QueueName::retry_tier(0), None);
        assert_eq!(QueueName::retry_tier(4), None);
    }

    #[test]
    fn test_message_serde_round_trip() {
        let message = DocumentMessage::with_retry_count(Uuid::new_v4(), 2);
        let json = serde_json::to_value(&message).unwrap();
        let parsed: DocumentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }
}

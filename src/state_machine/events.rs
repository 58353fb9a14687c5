use serde::{Deserialize, Serialize};

use crate::models::ErrorKind;

/// Events that drive a document through the delivery state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum DeliveryEvent {
    /// A send-document message was picked up; begin (or restart) validation
    Start,
    /// XML parsed and classified
    ContentExtracted,
    /// Signing key applied, file ready for dispatch
    Signed,
    /// SUNAT accepted the file for asynchronous processing
    TicketIssued(String),
    /// SUNAT answered definitively with a CDR
    CdrReceived,
    /// SUNAT rejected the content; definitive from a protocol standpoint
    Rejected,
    /// A ticket poll came back without a definitive answer; poll again later
    Recheck,
    /// Transport failed; a delayed re-attempt has been scheduled
    ScheduleRetry,
    /// Terminal failure
    Fail(ErrorKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde() {
        let event = DeliveryEvent::TicketIssued("T-001".to_string());
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DeliveryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);

        let fail = DeliveryEvent::Fail(ErrorKind::RetryConsumed);
        let json = serde_json::to_string(&fail).unwrap();
        assert!(json.contains("retry_consumed"));
    }
}

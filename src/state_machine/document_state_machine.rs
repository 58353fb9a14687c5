use std::sync::Arc;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::DeliveryEvent,
    states::DeliveryStatus,
};
use crate::models::{Document, DocumentStore};

/// Determine the target state for an event, independent of any side effects.
///
/// Redelivery re-entry is legal: a `Start` on a document already `Sending`
/// restarts validation (the previous attempt died before acknowledging), and
/// `Recheck`/`ScheduleRetry` self-loop on `AwaitingTicket`. Terminal states
/// accept no events.
pub fn determine_target_state(
    current: DeliveryStatus,
    event: &DeliveryEvent,
) -> StateMachineResult<DeliveryStatus> {
    use DeliveryEvent as E;
    use DeliveryStatus as S;

    let target = match (current, event) {
        // A fresh pickup, or a redelivery of a document whose previous
        // attempt died before acknowledging: restart from validation.
        (S::Created | S::Validating | S::Signing | S::Sending, E::Start) => S::Validating,

        (S::Validating, E::ContentExtracted) => S::Signing,
        (S::Signing, E::Signed) => S::Sending,

        (S::Sending, E::TicketIssued(_)) => S::AwaitingTicket,
        (S::Sending, E::CdrReceived) => S::Delivered,
        (S::Sending, E::Rejected) => S::Delivered,
        (S::Sending, E::ScheduleRetry) => S::Sending,

        (S::AwaitingTicket, E::CdrReceived) => S::Delivered,
        (S::AwaitingTicket, E::Rejected) => S::Delivered,
        (S::AwaitingTicket, E::Recheck) => S::AwaitingTicket,
        (S::AwaitingTicket, E::ScheduleRetry) => S::AwaitingTicket,

        (from, E::Fail(_)) if !from.is_terminal() => S::Failed,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: format!("{event:?}"),
            })
        }
    };

    Ok(target)
}

/// State machine driving one document's delivery lifecycle.
///
/// Owns a working copy of the document; every transition persists the whole
/// row through the store's version-stamp check, so a concurrent processor of
/// the same document loses with a `VersionConflict` instead of a lost update.
pub struct DocumentStateMachine {
    document: Document,
    store: Arc<dyn DocumentStore>,
}

impl DocumentStateMachine {
    pub fn new(document: Document, store: Arc<dyn DocumentStore>) -> Self {
        Self { document, store }
    }

    pub fn current_state(&self) -> DeliveryStatus {
        self.document.delivery_status
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Mutable access for the orchestrator to stage field updates that should
    /// be committed together with the next transition.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// Attempt to transition the document, committing the new state (and any
    /// staged field updates) in one version-checked write.
    pub async fn transition(
        &mut self,
        event: DeliveryEvent,
    ) -> StateMachineResult<DeliveryStatus> {
        let current = self.document.delivery_status;
        let target = determine_target_state(current, &event)?;

        self.apply_event(&event);
        self.document.delivery_status = target;

        let stored = self.store.update(&self.document).await?;
        self.document = stored;

        tracing::debug!(
            document_id = %self.document.id,
            from = %current,
            to = %target,
            "delivery transition"
        );

        Ok(target)
    }

    fn apply_event(&mut self, event: &DeliveryEvent) {
        match event {
            DeliveryEvent::TicketIssued(ticket) => {
                self.document.sunat_ticket = Some(ticket.clone());
            }
            DeliveryEvent::Fail(kind) => {
                self.document.error = Some(*kind);
            }
            _ => {}
        }
    }
}

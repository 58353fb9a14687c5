//! # Document Pipeline
//!
//! Sequences one document through validate → sign → dispatch → finalize,
//! turning every dispatcher outcome into a state transition plus a queue
//! decision. No exception escapes as document state: failures are classified
//! and written to the row, and the message disposition (ack, nack, followups)
//! always matches what was committed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::events::EventPublisher;
use crate::keys::{KeyAlgorithm, KeyError, KeyManager, KeyUse};
use crate::messaging::{DocumentMessage, QueueName};
use crate::models::{Document, DocumentStore, ErrorKind, TenantConfigStore};
use crate::scheduler::{RetryDecision, RetryPolicy};
use crate::sender::{
    zip_document, BillService, DispatchResult, SendFileRequest, SunatStatus,
};
use crate::state_machine::{DeliveryEvent, DeliveryStatus, DocumentStateMachine};
use crate::storage::FileStore;
use crate::xml::{extract_content, DocumentType, SignError, XmlSigner};

/// Documents are signed RS256 unless a tenant key says otherwise
const DEFAULT_SIGNING_ALGORITHM: KeyAlgorithm = KeyAlgorithm::RS256;

/// Freshly enqueued ids may beat the creating transaction to us; reread
/// briefly before giving the message back.
const DOCUMENT_LOOKUP_ATTEMPTS: usize = 3;
const DOCUMENT_LOOKUP_BACKOFF: Duration = Duration::from_millis(50);

/// A message to enqueue after the current one is acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct Followup {
    pub queue: QueueName,
    pub message: DocumentMessage,
    pub delay: Option<Duration>,
}

/// What the worker should do with the message it handed us
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Delete the message; enqueue the followups first
    Ack { followups: Vec<Followup> },
    /// Leave the message for redelivery after the visibility timeout
    Nack { reason: String },
}

impl Disposition {
    pub fn ack() -> Self {
        Self::Ack { followups: vec![] }
    }

    pub fn ack_with(followups: Vec<Followup>) -> Self {
        Self::Ack { followups }
    }

    pub fn nack(reason: impl Into<String>) -> Self {
        Self::Nack {
            reason: reason.into(),
        }
    }
}

/// Which web service call produced a dispatch outcome
#[derive(Debug, Clone, Copy, PartialEq)]
enum DispatchPhase {
    Send,
    TicketCheck,
}

/// The delivery pipeline orchestrator
pub struct DocumentPipeline {
    documents: Arc<dyn DocumentStore>,
    tenants: Arc<dyn TenantConfigStore>,
    files: Arc<dyn FileStore>,
    bill_service: Arc<dyn BillService>,
    key_manager: Arc<KeyManager>,
    retry_policy: RetryPolicy,
    events: EventPublisher,
    ticket_check_delay: Duration,
}

impl DocumentPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        tenants: Arc<dyn TenantConfigStore>,
        files: Arc<dyn FileStore>,
        bill_service: Arc<dyn BillService>,
        key_manager: Arc<KeyManager>,
        retry_policy: RetryPolicy,
        events: EventPublisher,
        ticket_check_delay: Duration,
    ) -> Self {
        Self {
            documents,
            tenants,
            files,
            bill_service,
            key_manager,
            retry_policy,
            events,
            ticket_check_delay,
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Process a send-document (or retry tier) message
    pub async fn handle_send(&self, message: &DocumentMessage) -> Result<Disposition> {
        let Some(document) = self.load_with_grace(message.document_id).await? else {
            return Ok(Disposition::nack(format!(
                "document {} not found",
                message.document_id
            )));
        };

        // Redelivery of finished work is a no-op: no dispatcher call, no write
        if document.delivery_status.is_terminal() {
            tracing::debug!(document_id = %document.id, status = %document.delivery_status,
                "ignoring send message for terminal document");
            return Ok(Disposition::ack());
        }
        if document.delivery_status == DeliveryStatus::AwaitingTicket {
            tracing::debug!(document_id = %document.id,
                "ignoring send message, ticket flow owns this document");
            return Ok(Disposition::ack());
        }

        let mut machine = DocumentStateMachine::new(document, Arc::clone(&self.documents));
        machine.document_mut().reset_for_attempt();
        machine.transition(DeliveryEvent::Start).await?;

        let xml = match self.files.get(&machine.document().storage_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .nack_with_error(machine, ErrorKind::FetchFile, e.to_string())
                    .await
            }
        };

        let content = match extract_content(&xml) {
            Ok(content) => content,
            Err(e) => {
                machine.document_mut().file_valid = Some(false);
                return self.fail(machine, ErrorKind::ReadFile, e.to_string()).await;
            }
        };
        let Some(document_kind) = content.classified() else {
            let document = machine.document_mut();
            document.file_valid = Some(false);
            document.document_type = Some(content.document_type.clone());
            return self
                .fail(
                    machine,
                    ErrorKind::UnsupportedDocumentType,
                    format!("unsupported root element: {}", content.document_type),
                )
                .await;
        };

        {
            let document = machine.document_mut();
            document.file_valid = Some(true);
            document.ruc = content.ruc.clone();
            document.document_id = content.document_id.clone();
            document.document_type = Some(content.document_type.clone());
            document.voided_line_document_type_code =
                content.voided_line_document_type_code.clone();
        }
        let Some(file_name) = content.sunat_file_name() else {
            return self
                .fail(
                    machine,
                    ErrorKind::ReadFile,
                    "document carries no issuer RUC or document id".to_string(),
                )
                .await;
        };
        machine.transition(DeliveryEvent::ContentExtracted).await?;

        let ruc = content.ruc.clone().unwrap_or_default();
        let project_id = machine.document().project_id;
        let config = match self.tenants.sunat_config(project_id, &ruc).await? {
            Some(config) => config,
            None => {
                return self
                    .fail(
                        machine,
                        ErrorKind::CompanyNotFound,
                        format!("no delivery configuration for ruc={ruc}"),
                    )
                    .await
            }
        };

        let key = match self
            .key_manager
            .resolve_active_key(project_id, KeyUse::Sig, DEFAULT_SIGNING_ALGORITHM)
            .await
        {
            Ok(key) => key,
            Err(KeyError::NoKeyAvailable { .. }) => {
                return self
                    .fail(
                        machine,
                        ErrorKind::NoCertificateToSign,
                        "no active signing key for tenant".to_string(),
                    )
                    .await
            }
            Err(e) => return Err(e.into()),
        };

        let signed = match XmlSigner::new(key).sign_document(&xml) {
            Ok(signed) => signed,
            Err(e @ (SignError::InvalidDocument(_) | SignError::NoRootElement)) => {
                return self.fail(machine, ErrorKind::ReadFile, e.to_string()).await
            }
            Err(e) => return Err(e.into()),
        };
        machine.transition(DeliveryEvent::Signed).await?;

        let zip = zip_document(&file_name, &signed)?;
        let request = SendFileRequest {
            file_name,
            zip,
            url: document_kind.delivery_url(&config).to_string(),
            async_ticket: document_kind.uses_ticket(),
        };
        let result = self.bill_service.send_file(&request, &config).await?;

        self.apply_dispatch_result(machine, result, DispatchPhase::Send)
            .await
    }

    /// Process a check-ticket message
    pub async fn handle_ticket_check(&self, message: &DocumentMessage) -> Result<Disposition> {
        let Some(document) = self.load_with_grace(message.document_id).await? else {
            return Ok(Disposition::nack(format!(
                "document {} not found",
                message.document_id
            )));
        };

        if document.delivery_status.is_terminal() {
            tracing::debug!(document_id = %document.id, status = %document.delivery_status,
                "ignoring ticket message for terminal document");
            return Ok(Disposition::ack());
        }
        if document.delivery_status != DeliveryStatus::AwaitingTicket {
            tracing::warn!(document_id = %document.id, status = %document.delivery_status,
                "ticket message for a document not awaiting a ticket");
            return Ok(Disposition::ack());
        }
        let Some(ticket) = document.sunat_ticket.clone() else {
            tracing::warn!(document_id = %document.id, "awaiting ticket without a ticket value");
            return Ok(Disposition::ack());
        };

        let ruc = document.ruc.clone().unwrap_or_default();
        let url_kind = document
            .document_type
            .as_deref()
            .and_then(DocumentType::from_root_name);
        let project_id = document.project_id;

        let mut machine = DocumentStateMachine::new(document, Arc::clone(&self.documents));
        machine.document_mut().reset_for_attempt();

        let config = match self.tenants.sunat_config(project_id, &ruc).await? {
            Some(config) => config,
            None => {
                return self
                    .fail(
                        machine,
                        ErrorKind::CompanyNotFound,
                        format!("no delivery configuration for ruc={ruc}"),
                    )
                    .await
            }
        };
        let url = url_kind
            .map(|kind| kind.delivery_url(&config))
            .unwrap_or(&config.factura_url)
            .to_string();

        let result = self.bill_service.check_ticket(&ticket, &url, &config).await?;

        self.apply_dispatch_result(machine, result, DispatchPhase::TicketCheck)
            .await
    }

    async fn apply_dispatch_result(
        &self,
        mut machine: DocumentStateMachine,
        result: DispatchResult,
        phase: DispatchPhase,
    ) -> Result<Disposition> {
        match result {
            DispatchResult::Delivered {
                cdr,
                status,
                code,
                description,
                notes,
            } => {
                // The authority already answered; losing the CDR now would
                // lose the outcome, so a failed write nacks for redelivery.
                let cdr_ref = match self.files.put(&cdr, "zip").await {
                    Ok(cdr_ref) => cdr_ref,
                    Err(e) => {
                        return self
                            .nack_with_error(machine, ErrorKind::SaveCdrFile, e.to_string())
                            .await
                    }
                };

                {
                    let document = machine.document_mut();
                    document.storage_cdr = Some(cdr_ref);
                    document.sunat_status = Some(status.to_string());
                    document.sunat_code = code;
                    document.sunat_description = description;
                    document.sunat_notes = notes;
                }
                machine.transition(DeliveryEvent::CdrReceived).await?;
                self.events.publish(machine.document());
                tracing::info!(document_id = %machine.document().id, status = %status, "document delivered");
                Ok(Disposition::ack())
            }

            DispatchResult::Rejected {
                code,
                description,
                notes,
            } => {
                // Definitive from a protocol standpoint: the authority
                // answered, it just said no. Terminal, never retried.
                {
                    let document = machine.document_mut();
                    document.sunat_status = Some(SunatStatus::Rechazado.to_string());
                    document.sunat_code = code;
                    document.sunat_description = description;
                    document.sunat_notes = notes;
                }
                machine.transition(DeliveryEvent::Rejected).await?;
                self.events.publish(machine.document());
                tracing::info!(document_id = %machine.document().id, code = ?code, "document rejected by SUNAT");
                Ok(Disposition::ack())
            }

            DispatchResult::Accepted { ticket } => {
                let event = match phase {
                    DispatchPhase::Send => DeliveryEvent::TicketIssued(ticket.clone()),
                    DispatchPhase::TicketCheck => DeliveryEvent::Recheck,
                };
                machine.document_mut().sunat_status =
                    Some(SunatStatus::EnProceso.to_string());
                machine.transition(event).await?;

                let document = machine.document();
                Ok(Disposition::ack_with(vec![Followup {
                    queue: QueueName::CheckTicket,
                    message: DocumentMessage::with_retry_count(document.id, document.retries),
                    delay: Some(self.ticket_check_delay),
                }]))
            }

            DispatchResult::TransportUnavailable { reason } => {
                let kind = match phase {
                    DispatchPhase::Send => ErrorKind::SendFile,
                    DispatchPhase::TicketCheck => ErrorKind::CheckTicket,
                };

                match self.retry_policy.decide(machine.document().retries) {
                    RetryDecision::Requeue { tier, delay } => {
                        {
                            let document = machine.document_mut();
                            document.record_error(kind, &reason);
                            document.retries += 1;
                            document.scheduled_delivery = Some(
                                Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64),
                            );
                        }
                        machine.transition(DeliveryEvent::ScheduleRetry).await?;

                        let document = machine.document();
                        tracing::warn!(
                            document_id = %document.id,
                            retries = document.retries,
                            delay_secs = delay.as_secs(),
                            error = %kind,
                            "transport failure, retry scheduled"
                        );

                        let queue = match phase {
                            DispatchPhase::Send => QueueName::retry_tier(tier)
                                .unwrap_or(QueueName::RetryTier3),
                            DispatchPhase::TicketCheck => QueueName::CheckTicket,
                        };
                        Ok(Disposition::ack_with(vec![Followup {
                            queue,
                            message: DocumentMessage::with_retry_count(
                                document.id,
                                document.retries,
                            ),
                            delay: Some(delay),
                        }]))
                    }
                    RetryDecision::Exhausted => {
                        self.fail(machine, ErrorKind::RetryConsumed, reason).await
                    }
                }
            }
        }
    }

    /// Terminal failure: classify, commit, publish, route to the audit sink
    async fn fail(
        &self,
        mut machine: DocumentStateMachine,
        kind: ErrorKind,
        message: String,
    ) -> Result<Disposition> {
        machine.document_mut().record_error(kind, &message);
        machine.transition(DeliveryEvent::Fail(kind)).await?;
        self.events.publish(machine.document());

        let document = machine.document();
        tracing::warn!(document_id = %document.id, error = %kind, message = %message, "document failed");

        Ok(Disposition::ack_with(vec![Followup {
            queue: QueueName::ErrorAudit,
            message: DocumentMessage::with_retry_count(document.id, document.retries),
            delay: None,
        }]))
    }

    /// Transient infrastructure failure: record it on the row and hand the
    /// message back for redelivery.
    async fn nack_with_error(
        &self,
        mut machine: DocumentStateMachine,
        kind: ErrorKind,
        message: String,
    ) -> Result<Disposition> {
        machine.document_mut().record_error(kind, &message);
        self.documents.update(machine.document()).await?;
        Ok(Disposition::nack(message))
    }

    async fn load_with_grace(&self, id: Uuid) -> Result<Option<Document>> {
        for attempt in 0..DOCUMENT_LOOKUP_ATTEMPTS {
            if let Some(document) = self.documents.find(id).await? {
                return Ok(Some(document));
            }
            if attempt + 1 < DOCUMENT_LOOKUP_ATTEMPTS {
                tokio::time::sleep(DOCUMENT_LOOKUP_BACKOFF).await;
            }
        }
        tracing::warn!(document_id = %id, "document not found after reread grace");
        Ok(None)
    }
}

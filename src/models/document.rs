//! # Document Model
//!
//! A `Document` row tracks one electronic tax document through the delivery
//! pipeline: the uploaded XML (by blob reference), the extracted identifiers,
//! the delivery state machine position, retry bookkeeping and everything SUNAT
//! answered. Rows are never deleted; terminal documents are retained for audit.
//!
//! Maps to the `documents` table. The `version` column is an optimistic
//! concurrency stamp: updates only commit when the stamp still matches the
//! loaded value, and increment it atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::state_machine::DeliveryStatus;

/// Failure classification persisted on the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text")]
pub enum ErrorKind {
    /// Blob store read failed before dispatch
    #[sqlx(rename = "fetch_file")]
    FetchFile,
    /// Uploaded XML could not be parsed
    #[sqlx(rename = "read_file")]
    ReadFile,
    /// XML parsed but the root element is not a deliverable document
    #[sqlx(rename = "unsupported_document_type")]
    UnsupportedDocumentType,
    /// No company or project configuration matched the document's RUC
    #[sqlx(rename = "company_not_found")]
    CompanyNotFound,
    /// Key resolution produced no usable signing key
    #[sqlx(rename = "no_certificate_to_sign")]
    NoCertificateToSign,
    /// Web service call to deliver the file failed at the transport level
    #[sqlx(rename = "send_file")]
    SendFile,
    /// Web service call to check a ticket failed at the transport level
    #[sqlx(rename = "check_ticket")]
    CheckTicket,
    /// CDR was received but could not be written to the blob store
    #[sqlx(rename = "save_cdr_file")]
    SaveCdrFile,
    /// Retry budget exhausted without a definitive answer from SUNAT
    #[sqlx(rename = "retry_consumed")]
    RetryConsumed,
}

impl ErrorKind {
    /// Whether the delivery scheduler may re-attempt after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SendFile | Self::CheckTicket)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FetchFile => "fetch_file",
            Self::ReadFile => "read_file",
            Self::UnsupportedDocumentType => "unsupported_document_type",
            Self::CompanyNotFound => "company_not_found",
            Self::NoCertificateToSign => "no_certificate_to_sign",
            Self::SendFile => "send_file",
            Self::CheckTicket => "check_ticket",
            Self::SaveCdrFile => "save_cdr_file",
            Self::RetryConsumed => "retry_consumed",
        };
        write!(f, "{s}")
    }
}

/// One electronic tax document moving through the delivery pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub delivery_status: DeliveryStatus,
    pub retries: i32,
    pub scheduled_delivery: Option<DateTime<Utc>>,
    pub error: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub file_valid: Option<bool>,

    // Extracted XML content
    pub ruc: Option<String>,
    pub document_id: Option<String>,
    pub document_type: Option<String>,
    pub voided_line_document_type_code: Option<String>,

    // Blob references
    pub storage_file: String,
    pub storage_cdr: Option<String>,

    // SUNAT response
    pub sunat_ticket: Option<String>,
    pub sunat_status: Option<String>,
    pub sunat_code: Option<i32>,
    pub sunat_description: Option<String>,
    pub sunat_notes: Vec<String>,

    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Clear transient delivery bookkeeping before a (re)delivery attempt
    pub fn reset_for_attempt(&mut self) {
        self.error = None;
        self.error_message = None;
        self.scheduled_delivery = None;
    }

    /// Record a terminal or transient failure on the document
    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error = Some(kind);
        self.error_message = Some(message.into());
    }
}

/// Fields required to create a document row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub project_id: Uuid,
    pub storage_file: String,
}

/// Persistence seam for documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: Uuid) -> StoreResult<Option<Document>>;

    async fn insert(&self, new_document: NewDocument) -> StoreResult<Document>;

    /// Persist the given document, checking and incrementing the version stamp.
    /// Returns the stored row (with the new stamp). A stale stamp yields
    /// [`StoreError::VersionConflict`] and no write.
    async fn update(&self, document: &Document) -> StoreResult<Document>;
}

/// Postgres-backed document store
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(&self, id: Uuid) -> StoreResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    async fn insert(&self, new_document: NewDocument) -> StoreResult<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (id, project_id, delivery_status, retries, storage_file, sunat_notes, version)
            VALUES ($1, $2, 'created', 0, $3, '{}', 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_document.project_id)
        .bind(&new_document.storage_file)
        .fetch_one(&self.pool)
        .await?;
        Ok(document)
    }

    async fn update(&self, document: &Document) -> StoreResult<Document> {
        let updated = sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents SET
                delivery_status = $3,
                retries = $4,
                scheduled_delivery = $5,
                error = $6,
                error_message = $7,
                file_valid = $8,
                ruc = $9,
                document_id = $10,
                document_type = $11,
                voided_line_document_type_code = $12,
                storage_cdr = $13,
                sunat_ticket = $14,
                sunat_status = $15,
                sunat_code = $16,
                sunat_description = $17,
                sunat_notes = $18,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(document.version)
        .bind(document.delivery_status)
        .bind(document.retries)
        .bind(document.scheduled_delivery)
        .bind(document.error)
        .bind(&document.error_message)
        .bind(document.file_valid)
        .bind(&document.ruc)
        .bind(&document.document_id)
        .bind(&document.document_type)
        .bind(&document.voided_line_document_type_code)
        .bind(&document.storage_cdr)
        .bind(&document.sunat_ticket)
        .bind(&document.sunat_status)
        .bind(document.sunat_code)
        .bind(&document.sunat_description)
        .bind(&document.sunat_notes)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| StoreError::VersionConflict {
            entity: "document",
            id: document.id.to_string(),
        })
    }
}

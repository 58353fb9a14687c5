//! # Dispatch Results
//!
//! Typed outcomes of calls against the SUNAT web service, and the seam the
//! orchestrator uses to talk to it. The dispatcher is a pure adapter: it
//! performs no retries and no persistence, leaving every retry/state decision
//! to the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::SunatConfig;

/// Errors local to the dispatcher (building or decoding payloads). Transport
/// and availability problems are not errors; they surface as
/// [`DispatchResult::TransportUnavailable`].
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Zip handling failed: {0}")]
    Zip(String),

    #[error("Unreadable web service response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Processing status reported by SUNAT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SunatStatus {
    Aceptado,
    Rechazado,
    Excepcion,
    EnProceso,
}

impl fmt::Display for SunatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aceptado => write!(f, "ACEPTADO"),
            Self::Rechazado => write!(f, "RECHAZADO"),
            Self::Excepcion => write!(f, "EXCEPCION"),
            Self::EnProceso => write!(f, "EN_PROCESO"),
        }
    }
}

/// Outcome of one web service call
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// SUNAT took the file for asynchronous processing
    Accepted { ticket: String },
    /// SUNAT rejected the content; definitive, never retried
    Rejected {
        code: Option<i32>,
        description: Option<String>,
        notes: Vec<String>,
    },
    /// SUNAT answered definitively with a CDR
    Delivered {
        cdr: Vec<u8>,
        status: SunatStatus,
        code: Option<i32>,
        description: Option<String>,
        notes: Vec<String>,
    },
    /// The service could not be reached or answered like it was down
    TransportUnavailable { reason: String },
}

/// One file ready for delivery
#[derive(Debug, Clone)]
pub struct SendFileRequest {
    /// SUNAT file name, without extension (e.g. `20123456789-01-F001-1`)
    pub file_name: String,
    /// Zipped signed XML
    pub zip: Vec<u8>,
    /// Target endpoint for this document kind
    pub url: String,
    /// Summary/void documents go through `sendSummary` and yield a ticket
    pub async_ticket: bool,
}

/// Adapter over the SUNAT web service
#[async_trait]
pub trait BillService: Send + Sync {
    async fn send_file(
        &self,
        request: &SendFileRequest,
        config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError>;

    async fn check_ticket(
        &self,
        ticket: &str,
        url: &str,
        config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError>;
}

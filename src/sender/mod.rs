//! # Delivery Dispatcher
//!
//! Pure adapter over the SUNAT billService: SOAP envelopes, zip handling, CDR
//! reading and the reqwest client. Retry and persistence decisions live with
//! the orchestrator, never here.

pub mod cdr;
pub mod client;
pub mod envelope;
pub mod result;

pub use cdr::{parse_cdr, CdrSummary};
pub use client::SunatClient;
pub use envelope::{unzip_first_entry, zip_document};
pub use result::{BillService, DispatchError, DispatchResult, SendFileRequest, SunatStatus};

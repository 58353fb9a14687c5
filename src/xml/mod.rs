//! # UBL Document Handling
//!
//! Content extraction and XML-DSig signing for uploaded documents.

pub mod content;
pub mod signer;

pub use content::{extract_content, DocumentType, XmlContent, XmlError};
pub use signer::{verify, SignError, XmlSigner};

//! # Document Content Extraction
//!
//! Parses an uploaded UBL document, classifies it and pulls out the
//! identifiers the pipeline needs: the issuer RUC, the document id
//! (series-number) and, for void/summary documents, the affected line type.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::SunatConfig;

/// Errors raised while reading uploaded XML
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Document has no root element")]
    Empty,
}

/// Deliverable UBL document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    CreditNote,
    DebitNote,
    VoidedDocuments,
    SummaryDocuments,
    DespatchAdvice,
    Perception,
    Retention,
}

impl DocumentType {
    pub fn from_root_name(name: &str) -> Option<Self> {
        match name {
            "Invoice" => Some(Self::Invoice),
            "CreditNote" => Some(Self::CreditNote),
            "DebitNote" => Some(Self::DebitNote),
            "VoidedDocuments" => Some(Self::VoidedDocuments),
            "SummaryDocuments" => Some(Self::SummaryDocuments),
            "DespatchAdvice" => Some(Self::DespatchAdvice),
            "Perception" => Some(Self::Perception),
            "Retention" => Some(Self::Retention),
            _ => None,
        }
    }

    /// SUNAT catalog code used in delivery file names. Void and summary
    /// documents embed their prefix (RA/RC) in the document id instead.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Invoice => Some("01"),
            Self::CreditNote => Some("07"),
            Self::DebitNote => Some("08"),
            Self::DespatchAdvice => Some("09"),
            Self::Retention => Some("20"),
            Self::Perception => Some("40"),
            Self::VoidedDocuments | Self::SummaryDocuments => None,
        }
    }

    /// Documents processed asynchronously: SUNAT answers with a ticket
    /// instead of an immediate CDR.
    pub fn uses_ticket(&self) -> bool {
        matches!(self, Self::VoidedDocuments | Self::SummaryDocuments)
    }

    /// Delivery endpoint for this document kind
    pub fn delivery_url<'a>(&self, config: &'a SunatConfig) -> &'a str {
        match self {
            Self::DespatchAdvice => &config.guia_url,
            Self::Perception | Self::Retention => &config.percepcion_retencion_url,
            _ => &config.factura_url,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invoice => "Invoice",
            Self::CreditNote => "CreditNote",
            Self::DebitNote => "DebitNote",
            Self::VoidedDocuments => "VoidedDocuments",
            Self::SummaryDocuments => "SummaryDocuments",
            Self::DespatchAdvice => "DespatchAdvice",
            Self::Perception => "Perception",
            Self::Retention => "Retention",
        };
        write!(f, "{s}")
    }
}

/// Identifiers extracted from an uploaded document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XmlContent {
    /// Root element local name, whatever it was
    pub document_type: String,
    pub ruc: Option<String>,
    pub document_id: Option<String>,
    pub voided_line_document_type_code: Option<String>,
}

impl XmlContent {
    /// Classify the root element; `None` means the document is not deliverable
    pub fn classified(&self) -> Option<DocumentType> {
        DocumentType::from_root_name(&self.document_type)
    }

    /// File name (without extension) SUNAT expects for this document
    pub fn sunat_file_name(&self) -> Option<String> {
        let ruc = self.ruc.as_deref()?;
        let document_id = self.document_id.as_deref()?;
        match self.classified()? {
            kind if kind.uses_ticket() => Some(format!("{ruc}-{document_id}")),
            kind => kind.code().map(|code| format!("{ruc}-{code}-{document_id}")),
        }
    }
}

/// Parse an uploaded document and extract its identifiers
pub fn extract_content(xml: &[u8]) -> Result<XmlContent, XmlError> {
    let mut reader = Reader::from_reader(xml);

    let mut content = XmlContent::default();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() && content.document_type.is_empty() {
                    content.document_type = name.clone();
                }
                stack.push(name);
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| XmlError::Malformed(e.to_string()))?;
                capture(&mut content, &stack, text.trim());
            }
            Ok(Event::Eof) => {
                // Open elements at end of input mean a truncated document
                if let Some(open) = stack.last() {
                    return Err(XmlError::Malformed(format!(
                        "unexpected end of document inside <{open}>"
                    )));
                }
                break;
            }
            Ok(_) => {}
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
        }
    }

    if content.document_type.is_empty() {
        return Err(XmlError::Empty);
    }
    Ok(content)
}

fn capture(content: &mut XmlContent, stack: &[String], text: &str) {
    if text.is_empty() {
        return;
    }

    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    match path.as_slice() {
        [_, "ID"] => {
            if content.document_id.is_none() {
                content.document_id = Some(text.to_string());
            }
        }
        [.., "AccountingSupplierParty", "CustomerAssignedAccountID"]
        | [.., "AccountingSupplierParty", "Party", "PartyIdentification", "ID"]
        | [.., "AgentParty", "PartyIdentification", "ID"] => {
            if content.ruc.is_none() {
                content.ruc = Some(text.to_string());
            }
        }
        [_, "VoidedDocumentsLine", "DocumentTypeCode"]
        | [_, "SummaryDocumentsLine", "DocumentTypeCode"] => {
            if content.voided_line_document_type_code.is_none() {
                content.voided_line_document_type_code = Some(text.to_string());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2"
         xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2"
         xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:ID>F001-1</cbc:ID>
  <cbc:IssueDate>2022-01-31</cbc:IssueDate>
  <cac:AccountingSupplierParty>
    <cac:Party>
      <cac:PartyIdentification>
        <cbc:ID schemeID="6">20123456789</cbc:ID>
      </cac:PartyIdentification>
    </cac:Party>
  </cac:AccountingSupplierParty>
</Invoice>"#;

    const VOIDED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VoidedDocuments xmlns="urn:sunat:names:specification:ubl:peru:schema:xsd:VoidedDocuments-1"
                 xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2"
                 xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2"
                 xmlns:sac="urn:sunat:names:specification:ubl:peru:schema:xsd:SunatAggregateComponents-1">
  <cbc:ID>RA-20220131-1</cbc:ID>
  <cac:AccountingSupplierParty>
    <cbc:CustomerAssignedAccountID>20123456789</cbc:CustomerAssignedAccountID>
  </cac:AccountingSupplierParty>
  <sac:VoidedDocumentsLine>
    <cbc:DocumentTypeCode>01</cbc:DocumentTypeCode>
  </sac:VoidedDocumentsLine>
</VoidedDocuments>"#;

    #[test]
    fn test_extract_invoice() {
        let content = extract_content(INVOICE.as_bytes()).unwrap();
        assert_eq!(content.document_type, "Invoice");
        assert_eq!(content.classified(), Some(DocumentType::Invoice));
        assert_eq!(content.ruc.as_deref(), Some("20123456789"));
        assert_eq!(content.document_id.as_deref(), Some("F001-1"));
        assert!(content.voided_line_document_type_code.is_none());
        assert_eq!(
            content.sunat_file_name().unwrap(),
            "20123456789-01-F001-1"
        );
    }

    #[test]
    fn test_extract_voided_documents() {
        let content = extract_content(VOIDED.as_bytes()).unwrap();
        assert_eq!(content.classified(), Some(DocumentType::VoidedDocuments));
        assert_eq!(content.ruc.as_deref(), Some("20123456789"));
        assert_eq!(content.document_id.as_deref(), Some("RA-20220131-1"));
        assert_eq!(content.voided_line_document_type_code.as_deref(), Some("01"));
        assert_eq!(
            content.sunat_file_name().unwrap(),
            "20123456789-RA-20220131-1"
        );
    }

    #[test]
    fn test_unknown_root_is_not_classified() {
        let xml = "<Quotation><ID>Q-1</ID></Quotation>";
        let content = extract_content(xml.as_bytes()).unwrap();
        assert_eq!(content.document_type, "Quotation");
        assert!(content.classified().is_none());
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let err = extract_content(b"<Invoice><unclosed>").unwrap_err();
        assert!(matches!(err, XmlError::Malformed(_)));
    }

    #[test]
    fn test_truncated_document_is_rejected() {
        // Well-formed prefix, but the root element never closes
        let err = extract_content(b"<Invoice><cbc:ID>F001-1</cbc:ID>").unwrap_err();
        assert!(matches!(err, XmlError::Malformed(_)));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(extract_content(b"").is_err());
        assert!(extract_content(b"   ").is_err());
    }

    #[test]
    fn test_ticket_documents() {
        assert!(DocumentType::VoidedDocuments.uses_ticket());
        assert!(DocumentType::SummaryDocuments.uses_ticket());
        assert!(!DocumentType::Invoice.uses_ticket());
        assert!(!DocumentType::DespatchAdvice.uses_ticket());
    }

    #[test]
    fn test_delivery_url_selection() {
        let config = SunatConfig {
            factura_url: "https://factura".to_string(),
            guia_url: "https://guia".to_string(),
            percepcion_retencion_url: "https://percepcion".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(DocumentType::Invoice.delivery_url(&config), "https://factura");
        assert_eq!(DocumentType::DespatchAdvice.delivery_url(&config), "https://guia");
        assert_eq!(DocumentType::Retention.delivery_url(&config), "https://percepcion");
    }
}

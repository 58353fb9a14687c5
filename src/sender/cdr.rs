//! # CDR Reading
//!
//! The CDR (constancia de recepción) is a zipped `ApplicationResponse`
//! document. The blob is stored verbatim; only the response code, description
//! and notes are read out for the document record.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::envelope::unzip_first_entry;
use super::result::{DispatchError, SunatStatus};

/// Fields read out of a CDR
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdrSummary {
    pub code: Option<i32>,
    pub description: Option<String>,
    pub notes: Vec<String>,
}

impl CdrSummary {
    /// Processing status implied by the response code.
    ///
    /// SUNAT's catalog: `0` accepted, `1..1999` service exceptions,
    /// `2000..3999` content rejections, `4000+` accepted with observations.
    pub fn status(&self) -> SunatStatus {
        match self.code {
            Some(0) => SunatStatus::Aceptado,
            Some(code) if (2000..4000).contains(&code) => SunatStatus::Rechazado,
            Some(code) if (1..2000).contains(&code) => SunatStatus::Excepcion,
            _ => SunatStatus::Aceptado,
        }
    }
}

/// Read code, description and notes from a zipped CDR
pub fn parse_cdr(zip_bytes: &[u8]) -> Result<CdrSummary, DispatchError> {
    let xml = unzip_first_entry(zip_bytes)?;

    let mut reader = Reader::from_reader(xml.as_slice());

    let mut summary = CdrSummary::default();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                let path: Vec<&str> = stack.iter().map(String::as_str).collect();
                match path.as_slice() {
                    [.., "Response", "ResponseCode"] => {
                        if summary.code.is_none() {
                            summary.code = text.parse().ok();
                        }
                    }
                    [.., "Response", "Description"] => {
                        if summary.description.is_none() {
                            summary.description = Some(text);
                        }
                    }
                    [_, "Note"] => summary.notes.push(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DispatchError::InvalidResponse(e.to_string())),
        }
    }

    Ok(summary)
}

//! # SOAP Envelopes and Zip Handling
//!
//! SUNAT's billService is SOAP 1.1 with a WS-Security UsernameToken header;
//! files travel zipped and base64-encoded inside the body. This module builds
//! the request envelopes and decodes the interesting parts of responses.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::result::DispatchError;
use crate::models::SunatConfig;

/// Zip a signed document under the entry name SUNAT expects
pub fn zip_document(file_name: &str, xml: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(format!("{file_name}.xml"), options)
        .map_err(|e| DispatchError::Zip(e.to_string()))?;
    writer
        .write_all(xml)
        .map_err(|e| DispatchError::Zip(e.to_string()))?;

    let cursor = writer
        .finish()
        .map_err(|e| DispatchError::Zip(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// First entry of a zip archive (the CDR carries a single XML)
pub fn unzip_first_entry(zip_bytes: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let mut archive =
        ZipArchive::new(Cursor::new(zip_bytes)).map_err(|e| DispatchError::Zip(e.to_string()))?;
    if archive.len() == 0 {
        return Err(DispatchError::Zip("archive has no entries".to_string()));
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| DispatchError::Zip(e.to_string()))?;
    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(|e| DispatchError::Zip(e.to_string()))?;
    Ok(content)
}

fn security_header(config: &SunatConfig) -> String {
    format!(
        concat!(
            "<soapenv:Header>",
            "<wsse:Security>",
            "<wsse:UsernameToken>",
            "<wsse:Username>{username}</wsse:Username>",
            "<wsse:Password>{password}</wsse:Password>",
            "</wsse:UsernameToken>",
            "</wsse:Security>",
            "</soapenv:Header>"
        ),
        username = escape_text(&config.username),
        password = escape_text(&config.password),
    )
}

fn envelope(header: &str, body: &str) -> String {
    format!(
        concat!(
            "<soapenv:Envelope ",
            "xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ser=\"http://service.sunat.gob.pe\" ",
            "xmlns:wsse=\"http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd\">",
            "{header}",
            "<soapenv:Body>{body}</soapenv:Body>",
            "</soapenv:Envelope>"
        ),
        header = header,
        body = body,
    )
}

/// `sendBill` request: synchronous delivery, answers with a CDR
pub fn send_bill_envelope(file_name: &str, zip: &[u8], config: &SunatConfig) -> String {
    let body = format!(
        "<ser:sendBill><fileName>{}.zip</fileName><contentFile>{}</contentFile></ser:sendBill>",
        escape_text(file_name),
        STANDARD.encode(zip),
    );
    envelope(&security_header(config), &body)
}

/// `sendSummary` request: asynchronous delivery, answers with a ticket
pub fn send_summary_envelope(file_name: &str, zip: &[u8], config: &SunatConfig) -> String {
    let body = format!(
        "<ser:sendSummary><fileName>{}.zip</fileName><contentFile>{}</contentFile></ser:sendSummary>",
        escape_text(file_name),
        STANDARD.encode(zip),
    );
    envelope(&security_header(config), &body)
}

/// `getStatus` request: poll a ticket
pub fn get_status_envelope(ticket: &str, config: &SunatConfig) -> String {
    let body = format!(
        "<ser:getStatus><ticket>{}</ticket></ser:getStatus>",
        escape_text(ticket),
    );
    envelope(&security_header(config), &body)
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Fields a billService response may carry, regardless of operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoapResponse {
    /// Base64 CDR zip (`applicationResponse` or `getStatus` content)
    pub application_response: Option<String>,
    pub ticket: Option<String>,
    pub status_code: Option<String>,
    pub fault_code: Option<String>,
    pub fault_string: Option<String>,
}

/// Pull the interesting elements out of a response body, namespace-agnostic
pub fn parse_response(body: &str) -> Result<SoapResponse, DispatchError> {
    let mut reader = Reader::from_reader(body.as_bytes());

    let mut response = SoapResponse::default();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                match current.as_deref() {
                    Some("applicationResponse") | Some("content") => {
                        response.application_response = Some(text)
                    }
                    Some("ticket") => response.ticket = Some(text),
                    Some("statusCode") => response.status_code = Some(text),
                    Some("faultcode") => response.fault_code = Some(text),
                    Some("faultstring") | Some("message") => {
                        if response.fault_string.is_none() {
                            response.fault_string = Some(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DispatchError::InvalidResponse(e.to_string())),
        }
    }

    Ok(response)
}

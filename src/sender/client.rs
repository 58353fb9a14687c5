//! # SUNAT Web Service Client
//!
//! reqwest-based implementation of [`BillService`] over SUNAT's SOAP
//! billService. Network and availability problems never become errors here;
//! they are reported as [`DispatchResult::TransportUnavailable`] so the
//! orchestrator owns every retry decision.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;

use super::cdr::parse_cdr;
use super::envelope::{
    get_status_envelope, parse_response, send_bill_envelope, send_summary_envelope, SoapResponse,
};
use super::result::{BillService, DispatchError, DispatchResult, SendFileRequest};
use crate::models::SunatConfig;

/// SOAP fault codes below this threshold indicate service trouble rather than
/// a verdict about the document itself.
const REJECTION_CODE_FLOOR: i32 = 1000;

pub struct SunatClient {
    http: reqwest::Client,
}

impl SunatClient {
    pub fn new(request_timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        Ok(Self { http })
    }

    async fn post(&self, url: &str, envelope: String) -> Result<(bool, String), reqwest::Error> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await?;

        let server_ok = !response.status().is_server_error();
        let body = response.text().await?;
        Ok((server_ok, body))
    }
}

#[async_trait]
impl BillService for SunatClient {
    async fn send_file(
        &self,
        request: &SendFileRequest,
        config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError> {
        let envelope = if request.async_ticket {
            send_summary_envelope(&request.file_name, &request.zip, config)
        } else {
            send_bill_envelope(&request.file_name, &request.zip, config)
        };

        let (server_ok, body) = match self.post(&request.url, envelope).await {
            Ok(result) => result,
            Err(e) => {
                return Ok(DispatchResult::TransportUnavailable {
                    reason: e.to_string(),
                })
            }
        };
        if !server_ok {
            return Ok(DispatchResult::TransportUnavailable {
                reason: "web service answered with a server error".to_string(),
            });
        }

        let response = parse_response(&body)?;
        interpret_send_response(response)
    }

    async fn check_ticket(
        &self,
        ticket: &str,
        url: &str,
        config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError> {
        let envelope = get_status_envelope(ticket, config);

        let (server_ok, body) = match self.post(url, envelope).await {
            Ok(result) => result,
            Err(e) => {
                return Ok(DispatchResult::TransportUnavailable {
                    reason: e.to_string(),
                })
            }
        };
        if !server_ok {
            return Ok(DispatchResult::TransportUnavailable {
                reason: "web service answered with a server error".to_string(),
            });
        }

        let response = parse_response(&body)?;
        interpret_status_response(ticket, response)
    }
}

/// Map a `sendBill`/`sendSummary` response body to a dispatch result
pub fn interpret_send_response(response: SoapResponse) -> Result<DispatchResult, DispatchError> {
    if response.fault_code.is_some() || response.fault_string.is_some() {
        return Ok(map_fault(&response));
    }

    if let Some(content) = response.application_response {
        return delivered_from_cdr(&content);
    }

    if let Some(ticket) = response.ticket {
        return Ok(DispatchResult::Accepted { ticket });
    }

    Ok(DispatchResult::TransportUnavailable {
        reason: "web service answered without a recognizable payload".to_string(),
    })
}

/// Map a `getStatus` response body to a dispatch result
pub fn interpret_status_response(
    ticket: &str,
    response: SoapResponse,
) -> Result<DispatchResult, DispatchError> {
    if response.fault_code.is_some() || response.fault_string.is_some() {
        return Ok(map_fault(&response));
    }

    match response.status_code.as_deref() {
        // Processed; the content carries the CDR with the verdict
        Some("0") | Some("99") => match response.application_response {
            Some(content) => delivered_from_cdr(&content),
            None if response.status_code.as_deref() == Some("99") => Ok(DispatchResult::Rejected {
                code: None,
                description: Some("ticket processed with errors and no receipt".to_string()),
                notes: vec![],
            }),
            None => Ok(DispatchResult::TransportUnavailable {
                reason: "ticket processed but no receipt was attached".to_string(),
            }),
        },
        // Still in process; keep waiting on the same ticket
        Some("98") => Ok(DispatchResult::Accepted {
            ticket: ticket.to_string(),
        }),
        other => Ok(DispatchResult::TransportUnavailable {
            reason: format!("unrecognized ticket status: {other:?}"),
        }),
    }
}

fn delivered_from_cdr(content_base64: &str) -> Result<DispatchResult, DispatchError> {
    let compact: String = content_base64.split_whitespace().collect();
    let cdr = STANDARD
        .decode(compact)
        .map_err(|e| DispatchError::InvalidResponse(format!("CDR is not base64: {e}")))?;
    let summary = parse_cdr(&cdr)?;

    Ok(DispatchResult::Delivered {
        status: summary.status(),
        code: summary.code,
        description: summary.description,
        notes: summary.notes,
        cdr,
    })
}

fn map_fault(response: &SoapResponse) -> DispatchResult {
    let code = response.fault_code.as_deref().and_then(fault_code_number);
    let description = response.fault_string.clone();

    match code {
        Some(number) if number >= REJECTION_CODE_FLOOR => DispatchResult::Rejected {
            code: Some(number),
            description,
            notes: vec![],
        },
        _ => DispatchResult::TransportUnavailable {
            reason: description
                .or(response.fault_code.clone())
                .unwrap_or_else(|| "web service fault".to_string()),
        },
    }
}

/// Numeric tail of fault codes like `soap-env:Client.2335` or `1033`
fn fault_code_number(fault_code: &str) -> Option<i32> {
    fault_code
        .rsplit(['.', ':'])
        .next()
        .and_then(|tail| tail.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::envelope::zip_document;
    use crate::sender::result::SunatStatus;

    fn cdr_base64(code: &str) -> String {
        let xml = format!(
            "<ApplicationResponse><DocumentResponse><Response>\
             <ResponseCode>{code}</ResponseCode><Description>d</Description>\
             </Response></DocumentResponse></ApplicationResponse>"
        );
        let zip = zip_document("cdr", xml.as_bytes()).unwrap();
        STANDARD.encode(zip)
    }

    #[test]
    fn test_fault_code_number() {
        assert_eq!(fault_code_number("soap-env:Client.2335"), Some(2335));
        assert_eq!(fault_code_number("soap-env:Client.0109"), Some(109));
        assert_eq!(fault_code_number("1033"), Some(1033));
        assert_eq!(fault_code_number("soap-env:Server"), None);
    }

    #[test]
    fn test_validation_fault_is_rejection() {
        let response = SoapResponse {
            fault_code: Some("soap-env:Client.2335".to_string()),
            fault_string: Some("ya existe".to_string()),
            ..Default::default()
        };
        let result = interpret_send_response(response).unwrap();
        assert!(matches!(
            result,
            DispatchResult::Rejected {
                code: Some(2335),
                ..
            }
        ));
    }

    #[test]
    fn test_availability_fault_is_transport_failure() {
        let response = SoapResponse {
            fault_code: Some("soap-env:Client.0109".to_string()),
            fault_string: Some("intente nuevamente".to_string()),
            ..Default::default()
        };
        let result = interpret_send_response(response).unwrap();
        assert!(matches!(result, DispatchResult::TransportUnavailable { .. }));
    }

    #[test]
    fn test_application_response_is_delivered() {
        let response = SoapResponse {
            application_response: Some(cdr_base64("0")),
            ..Default::default()
        };
        let result = interpret_send_response(response).unwrap();
        match result {
            DispatchResult::Delivered { status, code, .. } => {
                assert_eq!(status, SunatStatus::Aceptado);
                assert_eq!(code, Some(0));
            }
            other => panic!("expected Delivered, got {other:?}"),
        }
    }

    #[test]
    fn test_ticket_is_accepted() {
        let response = SoapResponse {
            ticket: Some("1622033448870".to_string()),
            ..Default::default()
        };
        let result = interpret_send_response(response).unwrap();
        assert_eq!(
            result,
            DispatchResult::Accepted {
                ticket: "1622033448870".to_string()
            }
        );
    }

    #[test]
    fn test_status_in_process_keeps_ticket() {
        let response = SoapResponse {
            status_code: Some("98".to_string()),
            ..Default::default()
        };
        let result = interpret_status_response("T-001", response).unwrap();
        assert_eq!(
            result,
            DispatchResult::Accepted {
                ticket: "T-001".to_string()
            }
        );
    }

    #[test]
    fn test_status_done_carries_cdr() {
        let response = SoapResponse {
            status_code: Some("0".to_string()),
            application_response: Some(cdr_base64("0")),
            ..Default::default()
        };
        let result = interpret_status_response("T-001", response).unwrap();
        assert!(matches!(result, DispatchResult::Delivered { .. }));
    }

    #[test]
    fn test_status_error_with_cdr_is_rejection_verdict() {
        let response = SoapResponse {
            status_code: Some("99".to_string()),
            application_response: Some(cdr_base64("2335")),
            ..Default::default()
        };
        let result = interpret_status_response("T-001", response).unwrap();
        match result {
            DispatchResult::Delivered { status, .. } => {
                assert_eq!(status, SunatStatus::Rechazado)
            }
            other => panic!("expected Delivered, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_response_is_transport_failure() {
        let result = interpret_send_response(SoapResponse::default()).unwrap();
        assert!(matches!(result, DispatchResult::TransportUnavailable { .. }));
    }
}

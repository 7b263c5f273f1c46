//! Webhook ingestion, independent of any HTTP framework
//!
//! The HTTP layer converts its request into an [`InboundRequest`], hands it
//! to [`WebhookProcessor::handle`], and turns the [`WebhookResponse`] back
//! into its own response type. Everything in between (audit trail, content
//! type, size and signature checks, event dispatch) lives here.

pub mod processor;
pub mod verify;

use serde_json::{json, Value};
use std::collections::HashMap;

pub use processor::{ProcessingOutcome, WebhookProcessor};
pub use verify::{SignatureFault, VerifiedEvent, VerifyError, WebhookVerifier};

/// Header carrying `sha256=<hex hmac>`
pub const SIGNATURE_HEADER: &str = "x-signature-256";

/// Plain representation of an inbound webhook delivery
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Header names are stored lowercased
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub source_address: Option<String>,
    /// Declared size of a body that was not read in full
    unread_length: Option<usize>,
}

impl InboundRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
            source_address: None,
            unread_length: None,
        }
    }

    /// Drop the body, keeping only its size; used when it exceeded the read cap
    pub fn with_unread_body(mut self, length: usize) -> Self {
        self.body = Vec::new();
        self.unread_length = Some(length);
        self
    }

    /// Size of the body as sent, whether or not it was read
    pub fn body_len(&self) -> usize {
        self.unread_length.unwrap_or(self.body.len())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn insert_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Status code and JSON body to send back to the remote platform
///
/// Bodies never carry diagnostics; those go to the audit log only.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn accepted() -> Self {
        Self {
            status: 200,
            body: json!({"status": "ok"}),
        }
    }

    pub fn rejected(status: u16) -> Self {
        Self {
            status,
            body: json!({"status": "rejected"}),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: 500,
            body: json!({"status": "error"}),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = InboundRequest::new(b"{}".to_vec())
            .with_header("Content-Type", "application/json")
            .with_header("X-Signature-256", "sha256=00");

        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header(SIGNATURE_HEADER), Some("sha256=00"));
        assert_eq!(request.header("x-missing"), None);
    }

    #[test]
    fn test_unread_body_keeps_length() {
        let request = InboundRequest::new(b"abc".to_vec()).with_unread_body(4096);
        assert!(request.body.is_empty());
        assert_eq!(request.body_len(), 4096);
        assert_eq!(InboundRequest::new(b"abc".to_vec()).body_len(), 3);
    }

    #[test]
    fn test_response_bodies_carry_no_detail() {
        assert_eq!(WebhookResponse::rejected(401).body, json!({"status": "rejected"}));
        assert!(!WebhookResponse::internal_error().is_success());
        assert!(WebhookResponse::accepted().is_success());
    }
}

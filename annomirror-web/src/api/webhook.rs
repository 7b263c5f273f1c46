//! POST /webhook - axum adapter around [`WebhookProcessor`]
//!
//! [`WebhookProcessor`]: annomirror_common::webhook::WebhookProcessor

use std::net::SocketAddr;

use annomirror_common::webhook::InboundRequest;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::AppState;

/// POST /webhook
pub async fn receive_webhook(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let max_body_bytes = state.webhook.verifier().max_body_bytes();

    let mut request = match to_bytes(body, max_body_bytes).await {
        Ok(bytes) => InboundRequest::new(bytes.to_vec()),
        Err(e) => {
            debug!(error = %e, "Webhook body not read in full");
            InboundRequest::new(Vec::new()).with_unread_body(declared_length(&headers, max_body_bytes))
        }
    };

    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            request.insert_header(name.as_str(), value);
        }
    }
    request.source_address = source_address(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let response = state.webhook.handle(&request).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, Json(response.body)).into_response()
}

/// Sender-declared size, at least one byte over the cap
fn declared_length(headers: &HeaderMap, max_body_bytes: usize) -> usize {
    headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0)
        .max(max_body_bytes.saturating_add(1))
}

/// First `X-Forwarded-For` hop, else the peer address
fn source_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4, 10.0.0.1"));
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();

        assert_eq!(
            source_address(&headers, Some(peer)).as_deref(),
            Some("198.51.100.4")
        );
    }

    #[test]
    fn test_peer_address_fallback() {
        let peer: SocketAddr = "192.0.2.10:41000".parse().unwrap();
        assert_eq!(
            source_address(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("192.0.2.10")
        );
        assert_eq!(source_address(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_declared_length_exceeds_cap() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers, 100), 101);

        headers.insert("content-length", HeaderValue::from_static("5000"));
        assert_eq!(declared_length(&headers, 100), 5000);
    }
}

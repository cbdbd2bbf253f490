//! The HTTP/1.1 upgrade handshake (RFC 6455 section 4).
//!
//! Key generation and the accept digest come from `tungstenite`; the
//! request and response themselves travel through this crate's own
//! HTTP codec.

use crate::base::neterror::NetError;
use crate::http::codec::{RequestHead, ResponseHead};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use tokio_tungstenite::tungstenite::handshake::{client::generate_key, derive_accept_key};

const WEBSOCKET_VERSION: &str = "13";

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn upgrade_err(msg: impl Into<String>) -> NetError {
    NetError::WsUpgrade(msg.into())
}

/// Client side of one handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    key: String,
    subprotocols: Vec<String>,
}

impl ClientHandshake {
    pub fn new(subprotocols: Vec<String>) -> Self {
        Self {
            key: generate_key(),
            subprotocols,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Upgrade headers to merge into the GET request.
    pub fn request_headers(&self) -> Result<HeaderMap, NetError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(
            header::SEC_WEBSOCKET_VERSION,
            HeaderValue::from_static(WEBSOCKET_VERSION),
        );
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_str(&self.key).map_err(|_| NetError::InvalidHeader)?,
        );
        if !self.subprotocols.is_empty() {
            let list = self.subprotocols.join(", ");
            headers.insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_str(&list).map_err(|_| NetError::InvalidHeader)?,
            );
        }
        Ok(headers)
    }

    /// Validate the server's answer. Returns the selected subprotocol.
    pub fn verify(&self, head: &ResponseHead) -> Result<Option<String>, NetError> {
        if head.status != StatusCode::SWITCHING_PROTOCOLS {
            return Err(upgrade_err(format!(
                "expected 101 Switching Protocols, got {}",
                head.status
            )));
        }
        if !header_has_token(&head.headers, header::UPGRADE, "websocket") {
            return Err(upgrade_err("missing Upgrade: websocket"));
        }
        if !header_has_token(&head.headers, header::CONNECTION, "upgrade") {
            return Err(upgrade_err("missing Connection: Upgrade"));
        }

        let expected = derive_accept_key(self.key.as_bytes());
        let accept = head
            .headers
            .get(header::SEC_WEBSOCKET_ACCEPT)
            .and_then(|v| v.to_str().ok());
        if accept != Some(expected.as_str()) {
            return Err(upgrade_err("Sec-WebSocket-Accept does not match key"));
        }

        let selected = head
            .headers
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());
        if let Some(protocol) = &selected {
            if !self.subprotocols.iter().any(|p| p == protocol) {
                return Err(upgrade_err(format!("server chose unrequested subprotocol {protocol}")));
            }
        }
        Ok(selected)
    }
}

/// Whether a request asks to be upgraded to WebSocket.
pub fn is_upgrade_request(head: &RequestHead) -> bool {
    header_has_token(&head.headers, header::UPGRADE, "websocket")
        && header_has_token(&head.headers, header::CONNECTION, "upgrade")
}

/// Validate an upgrade request and build the `101` response headers.
pub fn accept_request(head: &RequestHead) -> Result<HeaderMap, NetError> {
    if head.method != Method::GET {
        return Err(upgrade_err("upgrade request must be GET"));
    }
    if !is_upgrade_request(head) {
        return Err(upgrade_err("not a websocket upgrade"));
    }
    let version = head
        .headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok());
    if version != Some(WEBSOCKET_VERSION) {
        return Err(upgrade_err("unsupported Sec-WebSocket-Version"));
    }
    let key = head
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| upgrade_err("missing Sec-WebSocket-Key"))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    let accept = derive_accept_key(key.as_bytes());
    headers.insert(
        header::SEC_WEBSOCKET_ACCEPT,
        HeaderValue::from_str(&accept).map_err(|_| NetError::InvalidHeader)?,
    );
    Ok(headers)
}

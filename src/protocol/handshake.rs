//! HTTP Upgrade handshake (RFC 6455 §4)
//!
//! Runs over an already-validated transport: builds the upgrade request,
//! reads the response head, and checks the `Sec-WebSocket-Accept` digest.
//! Bytes the server sent past the response head are returned so the frame
//! decoder starts with nothing lost.

use super::constants::{ACCEPT_GUID, MAX_RESPONSE_HEAD, WEBSOCKET_VERSION};
use crate::connection::Transport;
use crate::url::WsUrl;
use crate::{Error, Result};
use base64::prelude::*;
use bytes::{Buf, BytesMut};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Headers the handshake owns; caller-supplied values for these are
/// dropped rather than allowed to corrupt the upgrade.
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
];

/// Outcome of a completed upgrade
#[derive(Debug)]
pub struct UpgradeResponse {
    /// Sub-protocol the server selected, if any
    pub protocol: Option<String>,
    /// Bytes received past the response head (start of the frame stream)
    pub leftover: BytesMut,
}

/// Random 16-byte nonce, base64-encoded, for `Sec-WebSocket-Key`.
pub fn request_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

/// Derive the expected `Sec-WebSocket-Accept` value for a request key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Build the upgrade request head.
pub fn build_request(
    url: &WsUrl,
    key: &str,
    protocols: &[String],
    headers: &HashMap<String, String>,
) -> String {
    let mut request = String::with_capacity(256);
    request.push_str(&format!("GET {} HTTP/1.1\r\n", url.request_path()));
    request.push_str(&format!("Host: {}\r\n", url.host_header()));
    request.push_str("Connection: Upgrade\r\n");
    request.push_str("Upgrade: websocket\r\n");
    request.push_str(&format!("Sec-WebSocket-Version: {}\r\n", WEBSOCKET_VERSION));
    request.push_str(&format!("Sec-WebSocket-Key: {}\r\n", key));
    if !protocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            protocols.join(", ")
        ));
    }
    for (name, value) in headers {
        if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            tracing::debug!(header = %name, "dropping caller header reserved for the handshake");
            continue;
        }
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");
    request
}

/// Send the upgrade request and validate the server's `101` response.
pub async fn upgrade(
    transport: &mut Transport,
    url: &WsUrl,
    protocols: &[String],
    headers: &HashMap<String, String>,
) -> Result<UpgradeResponse> {
    let key = request_key();
    let request = build_request(url, &key, protocols, headers);

    transport.write_all(request.as_bytes()).await?;
    transport.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(Error::HandshakeFailed(format!(
                "response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            )));
        }
        let n = transport.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::HandshakeFailed(
                "connection closed before the upgrade response completed".into(),
            ));
        }
    };

    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| Error::HandshakeFailed("response head is not valid UTF-8".into()))?
        .to_string();
    buf.advance(head_end + 4);

    let protocol = parse_response(&head, &key, protocols)?;
    tracing::debug!(?protocol, "WebSocket upgrade accepted");

    Ok(UpgradeResponse {
        protocol,
        leftover: buf,
    })
}

/// Offset of the head terminator (`\r\n\r\n`), if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Validate the response head; returns the negotiated sub-protocol.
fn parse_response(head: &str, key: &str, requested: &[String]) -> Result<Option<String>> {
    let mut lines = head.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| Error::HandshakeFailed("empty response head".into()))?;

    let status = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::HandshakeFailed(format!("malformed status line: '{}'", status_line)))?;
    if status != "101" {
        return Err(Error::HandshakeFailed(format!(
            "server returned status {} instead of 101",
            status
        )));
    }

    let mut upgrade_ok = false;
    let mut connection_ok = false;
    let mut accept: Option<&str> = None;
    let mut protocol: Option<String> = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "upgrade" => upgrade_ok = value.eq_ignore_ascii_case("websocket"),
            "connection" => {
                connection_ok = value
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
            }
            "sec-websocket-accept" => accept = Some(value),
            "sec-websocket-protocol" => protocol = Some(value.to_string()),
            _ => {}
        }
    }

    if !upgrade_ok {
        return Err(Error::HandshakeFailed(
            "missing or invalid Upgrade header".into(),
        ));
    }
    if !connection_ok {
        return Err(Error::HandshakeFailed(
            "missing or invalid Connection header".into(),
        ));
    }

    let expected = accept_key(key);
    match accept {
        Some(value) if value == expected => {}
        Some(_) => {
            return Err(Error::HandshakeFailed(
                "Sec-WebSocket-Accept digest mismatch".into(),
            ))
        }
        None => {
            return Err(Error::HandshakeFailed(
                "missing Sec-WebSocket-Accept header".into(),
            ))
        }
    }

    if let Some(selected) = &protocol {
        if !requested.iter().any(|p| p == selected) {
            return Err(Error::HandshakeFailed(format!(
                "server selected unrequested sub-protocol '{}'",
                selected
            )));
        }
    }

    Ok(protocol)
}

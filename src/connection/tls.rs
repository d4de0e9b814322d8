//! TLS session establishment with pinning interception
//!
//! The session wires a [`PinningVerifier`](crate::pinning) into the rustls
//! client configuration so the trust decision is made against the caller's
//! pins during the handshake, and the outcome lands in a shared validation
//! slot the connection can expose afterwards.

use super::transport::Transport;
use crate::config::SslConfig;
use crate::pinning::{PinningVerifier, ValidationResult};
use crate::url::WsUrl;
use crate::{Error, Result};
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use std::sync::{Arc, Mutex};

/// Shared slot the verifier writes the handshake's trust decision into.
pub(crate) type ValidationSlot = Arc<Mutex<Option<ValidationResult>>>;

/// Fresh, empty validation slot.
pub(crate) fn validation_slot() -> ValidationSlot {
    Arc::new(Mutex::new(None))
}

/// Read the recorded validation result, if the handshake got that far.
pub(crate) fn recorded(slot: &ValidationSlot) -> Option<ValidationResult> {
    slot.lock().expect("validation slot poisoned").clone()
}

/// Discard an in-progress or stale result (used when a handshake times
/// out: a decision that never completed is not reported).
pub(crate) fn discard(slot: &ValidationSlot) {
    *slot.lock().expect("validation slot poisoned") = None;
}

/// Establish the transport for a URL: plain TCP for `ws://`, a
/// pin-validated TLS session for `wss://`.
pub(crate) async fn establish(
    url: &WsUrl,
    ssl_config: &SslConfig,
    slot: &ValidationSlot,
) -> Result<Transport> {
    if !url.secure {
        tracing::debug!(host = %url.host, port = url.port, "plain transport, pinning not applicable");
        return Transport::connect(&url.host, url.port).await;
    }

    let client_config = Arc::new(client_config(ssl_config, slot.clone())?);
    match Transport::connect_tls(&url.host, url.port, client_config).await {
        Ok(transport) => {
            tracing::info!(host = %url.host, pinning = ssl_config.pinning_enabled(), "TLS session established");
            Ok(transport)
        }
        Err(err) => Err(classify_tls_failure(err, slot)),
    }
}

/// rustls client configuration with the pinning verifier installed.
fn client_config(ssl_config: &SslConfig, slot: ValidationSlot) -> Result<ClientConfig> {
    let verifier = PinningVerifier::new(ssl_config.clone(), slot)?;
    Ok(ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Fold a transport-level TLS failure back into the pinning decision that
/// caused it: if the verifier recorded a rejection, the session failed
/// because of pinning, not because of the socket.
fn classify_tls_failure(err: Error, slot: &ValidationSlot) -> Error {
    if let Some(result) = recorded(slot) {
        if result.pinning_enabled && !result.matched {
            let reason = result
                .error
                .unwrap_or_else(|| "no configured pin matched the presented chain".into());
            return Error::PinningFailed(reason);
        }
        if !result.pinning_enabled && !result.matched {
            let reason = result
                .error
                .unwrap_or_else(|| "trust-store evaluation rejected the chain".into());
            return Error::Tls(reason);
        }
    }
    match err {
        Error::Io(io) => Error::Tls(format!("TLS handshake failed: {}", io)),
        other => other,
    }
}

/// Server name for SNI, with basic hostname sanity checks.
pub(crate) fn server_name(hostname: &str) -> Result<ServerName<'static>> {
    let hostname = hostname.trim_end_matches('.');
    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::InvalidArgument(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }
    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::InvalidArgument(format!("invalid hostname for TLS: '{}'", hostname)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Pin, PinAlgorithm};

    #[test]
    fn test_server_name_accepts_hostnames_and_ips() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("feed.example.com").is_ok());
        assert!(server_name("example.com.").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
    }

    #[test]
    fn test_server_name_rejects_empty() {
        assert!(server_name("").is_err());
        assert!(server_name(".").is_err());
    }

    #[test]
    fn test_client_config_builds_with_pins() {
        use base64::prelude::*;
        use sha2::{Digest, Sha256};

        let pin = Pin::new(
            PinAlgorithm::Sha256,
            BASE64_STANDARD.encode(Sha256::digest(b"key")),
        );
        let config = client_config(
            &SslConfig::public_key_hash(vec![pin]),
            validation_slot(),
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_classify_pinning_rejection() {
        let slot = validation_slot();
        *slot.lock().unwrap() = Some(ValidationResult {
            evaluated: true,
            pinning_enabled: true,
            matched: false,
            matched_pin: None,
            chain_fingerprints: vec![],
            error: Some("no pin matched".into()),
        });

        let err = classify_tls_failure(
            Error::Io(std::io::Error::other("handshake aborted")),
            &slot,
        );
        assert!(matches!(err, Error::PinningFailed(_)));
    }

    #[test]
    fn test_classify_plain_tls_failure() {
        let slot = validation_slot();
        let err = classify_tls_failure(
            Error::Io(std::io::Error::other("connection reset")),
            &slot,
        );
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn test_discard_clears_slot() {
        let slot = validation_slot();
        *slot.lock().unwrap() = Some(ValidationResult {
            evaluated: true,
            pinning_enabled: true,
            matched: true,
            matched_pin: None,
            chain_fingerprints: vec![],
            error: None,
        });
        discard(&slot);
        assert!(recorded(&slot).is_none());
    }
}

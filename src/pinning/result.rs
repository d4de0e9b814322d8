//! Pinning decision records

use crate::config::Pin;
use rustls_pki_types::CertificateDer;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Outcome of evaluating one chain against one pin set.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Whether the chain is accepted
    pub matched: bool,
    /// The pin that matched, if the acceptance came from a real match
    pub matched_pin: Option<Pin>,
    /// Whether any pins were configured at all
    pub pinning_enabled: bool,
    /// Human-readable explanation of the decision
    pub reason: String,
}

impl MatchResult {
    pub(crate) fn matched(pin: Pin, reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            matched_pin: Some(pin),
            pinning_enabled: true,
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            matched_pin: None,
            pinning_enabled: true,
            reason: reason.into(),
        }
    }

    pub(crate) fn pinning_disabled() -> Self {
        Self {
            matched: true,
            matched_pin: None,
            pinning_enabled: false,
            reason: "no pins configured, pinning disabled".into(),
        }
    }
}

/// Diagnostic record of the trust decision made during the TLS handshake.
///
/// Immutable once the handshake completes; absent entirely before the
/// handshake reaches certificate evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether the trust decision ran (always true for a stored result)
    pub evaluated: bool,
    /// Whether pins were configured; false means standard trust evaluation
    pub pinning_enabled: bool,
    /// Whether the chain was accepted
    pub matched: bool,
    /// The pin that matched, for a real pin match
    pub matched_pin: Option<Pin>,
    /// Base64 SHA-256 digest of each presented certificate's DER, leaf first
    pub chain_fingerprints: Vec<String>,
    /// Failure detail when the chain was rejected
    pub error: Option<String>,
}

impl ValidationResult {
    /// Build the record for a pin-set evaluation.
    pub(crate) fn from_match(chain: &[CertificateDer<'_>], result: &MatchResult) -> Self {
        Self {
            evaluated: true,
            pinning_enabled: result.pinning_enabled,
            matched: result.matched,
            matched_pin: result.matched_pin.clone(),
            chain_fingerprints: chain_fingerprints(chain),
            error: (!result.matched).then(|| result.reason.clone()),
        }
    }

    /// Build the record for a standard trust evaluation (pinning disabled).
    pub(crate) fn trust_store(chain: &[CertificateDer<'_>], error: Option<String>) -> Self {
        Self {
            evaluated: true,
            pinning_enabled: false,
            matched: error.is_none(),
            matched_pin: None,
            chain_fingerprints: chain_fingerprints(chain),
            error,
        }
    }
}

/// Base64 SHA-256 digests over the DER of each chain member, leaf first.
pub(crate) fn chain_fingerprints(chain: &[CertificateDer<'_>]) -> Vec<String> {
    use base64::prelude::*;
    chain
        .iter()
        .map(|cert| BASE64_STANDARD.encode(Sha256::digest(cert.as_ref())))
        .collect()
}

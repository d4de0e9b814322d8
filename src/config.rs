//! Pinning and connection configuration
//!
//! These types mirror the maps the bridge layer hands across the boundary:
//! `sslConfig` is `{mode, pins: [{algorithm, value}]}` and `options` is a
//! bag of camelCase keys. Both deserialize with serde, so unrecognized
//! option keys are ignored rather than rejected.

use crate::{Error, Result};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How the presented chain is evaluated against the pin set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    /// Digest of the leaf certificate only (input selected by [`LeafInput`])
    LeafHash,
    /// Digest of the SubjectPublicKeyInfo of any certificate in the chain
    #[default]
    PublicKeyHash,
    /// The full presented chain must be byte-identical to the reference chain
    Chain,
}

impl std::fmt::Display for PinMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeafHash => write!(f, "leaf-hash"),
            Self::PublicKeyHash => write!(f, "public-key-hash"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

/// Digest algorithm for a pin value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinAlgorithm {
    /// SHA-256 (the conventional pinning digest)
    Sha256,
    /// SHA-512
    Sha512,
}

impl PinAlgorithm {
    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl std::fmt::Display for PinAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// A single trusted pin: a digest the caller trusts independent of the
/// system trust store, or a PEM certificate in [`PinMode::Chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    /// Digest algorithm the value was computed with
    pub algorithm: PinAlgorithm,
    /// Base64-encoded digest, or a PEM certificate in chain mode
    pub value: String,
}

impl Pin {
    /// Create a pin from an algorithm and a base64 digest (or PEM text).
    pub fn new(algorithm: PinAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }

    /// Decode the base64 digest value.
    pub fn digest_bytes(&self) -> Result<Vec<u8>> {
        BASE64_STANDARD
            .decode(self.value.trim())
            .map_err(|e| Error::InvalidArgument(format!("pin value is not valid base64: {}", e)))
    }

    /// Decode a PEM certificate value (chain mode) into DER bytes.
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        let mut reader = std::io::Cursor::new(self.value.as_bytes());
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::X509Certificate(cert))) => Ok(cert.as_ref().to_vec()),
            Ok(_) => Err(Error::InvalidArgument(
                "chain-mode pin value is not a PEM certificate".into(),
            )),
            Err(_) => Err(Error::InvalidArgument(
                "chain-mode pin value could not be parsed as PEM".into(),
            )),
        }
    }
}

/// Digest input for [`PinMode::LeafHash`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafInput {
    /// SubjectPublicKeyInfo DER of the leaf
    #[default]
    PublicKey,
    /// Full DER encoding of the leaf certificate
    Certificate,
}

/// Per-connection SSL pinning configuration.
///
/// An empty pin set is an explicit opt-out: the connection falls back to
/// standard trust-store evaluation, and the recorded validation result is
/// marked as pinning-disabled so the two cases stay distinguishable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SslConfig {
    /// Evaluation mode
    pub mode: PinMode,
    /// Ordered pin set; empty means pinning disabled
    pub pins: Vec<Pin>,
    /// Digest input for leaf-hash mode
    pub leaf_input: LeafInput,
}

impl SslConfig {
    /// Pinning disabled: standard trust evaluation applies.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Public-key-hash pinning over the whole chain.
    pub fn public_key_hash(pins: Vec<Pin>) -> Self {
        Self {
            mode: PinMode::PublicKeyHash,
            pins,
            leaf_input: LeafInput::default(),
        }
    }

    /// Whether any pins are configured.
    pub fn pinning_enabled(&self) -> bool {
        !self.pins.is_empty()
    }

    /// Parse the bridge-shaped `sslConfig` map.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidArgument(format!("invalid sslConfig: {}", e)))
    }

    /// Validate pin encodings up front so a bad configuration fails at
    /// creation instead of mid-handshake.
    pub fn validate(&self) -> Result<()> {
        for pin in &self.pins {
            match self.mode {
                PinMode::Chain => {
                    pin.certificate_der()?;
                }
                PinMode::LeafHash | PinMode::PublicKeyHash => {
                    let digest = pin.digest_bytes()?;
                    if digest.len() != pin.algorithm.digest_len() {
                        return Err(Error::InvalidArgument(format!(
                            "pin digest is {} bytes, {} expects {}",
                            digest.len(),
                            pin.algorithm,
                            pin.algorithm.digest_len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Connection options bag.
///
/// Unrecognized keys are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    /// Bound on DNS + TCP + TLS establishment, in milliseconds
    pub connect_timeout_ms: u64,
    /// Bound on the WebSocket upgrade exchange, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Extra HTTP headers for the upgrade request
    pub headers: HashMap<String, String>,
    /// Largest accepted frame payload; larger frames fail the connection
    pub max_message_size: usize,
    /// How long a closing connection waits for the peer's close frame
    pub close_grace_ms: u64,
}

impl ConnectOptions {
    /// Parse the bridge-shaped `options` map.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidArgument(format!("invalid options: {}", e)))
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub(crate) fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            handshake_timeout_ms: 30_000,
            headers: HashMap::new(),
            max_message_size: 16 * 1024 * 1024,
            close_grace_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ssl_config_from_bridge_map() {
        let value = json!({
            "mode": "public-key-hash",
            "pins": [{"algorithm": "sha256", "value": "AAAA"}],
        });
        let config = SslConfig::from_value(&value).unwrap();
        assert_eq!(config.mode, PinMode::PublicKeyHash);
        assert_eq!(config.pins.len(), 1);
        assert_eq!(config.pins[0].algorithm, PinAlgorithm::Sha256);
    }

    #[test]
    fn test_ssl_config_mode_names() {
        for (name, mode) in [
            ("leaf-hash", PinMode::LeafHash),
            ("public-key-hash", PinMode::PublicKeyHash),
            ("chain", PinMode::Chain),
        ] {
            let value = json!({"mode": name, "pins": []});
            assert_eq!(SslConfig::from_value(&value).unwrap().mode, mode);
            assert_eq!(mode.to_string(), name);
        }
    }

    #[test]
    fn test_ssl_config_empty_means_disabled() {
        let config = SslConfig::from_value(&json!({})).unwrap();
        assert!(!config.pinning_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_base64() {
        let config = SslConfig::public_key_hash(vec![Pin::new(PinAlgorithm::Sha256, "@@not-b64@@")]);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_digest_length() {
        let short = BASE64_STANDARD.encode([0u8; 16]);
        let config = SslConfig::public_key_hash(vec![Pin::new(PinAlgorithm::Sha256, short)]);
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_validate_accepts_correct_digest_length() {
        let digest = BASE64_STANDARD.encode([7u8; 32]);
        let config = SslConfig::public_key_hash(vec![Pin::new(PinAlgorithm::Sha256, digest)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_options_defaults() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.connect_timeout_ms, 30_000);
        assert_eq!(opts.handshake_timeout_ms, 30_000);
        assert_eq!(opts.max_message_size, 16 * 1024 * 1024);
        assert!(opts.headers.is_empty());
    }

    #[test]
    fn test_options_unrecognized_keys_ignored() {
        let value = json!({
            "connectTimeoutMs": 1500,
            "headers": {"Authorization": "Bearer t"},
            "someFutureOption": true,
        });
        let opts = ConnectOptions::from_value(&value).unwrap();
        assert_eq!(opts.connect_timeout_ms, 1500);
        assert_eq!(opts.headers.get("Authorization").unwrap(), "Bearer t");
        // someFutureOption silently dropped
        assert_eq!(opts.handshake_timeout_ms, 30_000);
    }

    #[test]
    fn test_leaf_input_default_is_public_key() {
        let value = json!({"mode": "leaf-hash", "pins": []});
        let config = SslConfig::from_value(&value).unwrap();
        assert_eq!(config.leaf_input, LeafInput::PublicKey);
    }
}

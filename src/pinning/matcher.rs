//! Pin evaluation against a presented certificate chain
//!
//! Fails closed: an empty chain, an unparseable certificate, or an
//! undecodable pin value can only produce a non-match.

use super::result::MatchResult;
use crate::config::{LeafInput, Pin, PinAlgorithm, PinMode, SslConfig};
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256, Sha512};

/// Evaluate a presented chain (leaf first) against the configured pin set.
pub fn evaluate(chain: &[CertificateDer<'_>], config: &SslConfig) -> MatchResult {
    if config.pins.is_empty() {
        return MatchResult::pinning_disabled();
    }

    if chain.is_empty() {
        return MatchResult::rejected("server presented an empty certificate chain");
    }

    match config.mode {
        PinMode::LeafHash => match_leaf(chain, config),
        PinMode::PublicKeyHash => match_public_keys(chain, config),
        PinMode::Chain => match_chain(chain, config),
    }
}

fn match_leaf(chain: &[CertificateDer<'_>], config: &SslConfig) -> MatchResult {
    let leaf = &chain[0];
    let input = match config.leaf_input {
        LeafInput::Certificate => leaf.as_ref().to_vec(),
        LeafInput::PublicKey => match spki_der(leaf) {
            Ok(spki) => spki,
            Err(reason) => return MatchResult::rejected(reason),
        },
    };

    match find_digest_match(&config.pins, &input) {
        Ok(Some(pin)) => MatchResult::matched(pin, "pin matched the leaf certificate"),
        Ok(None) => MatchResult::rejected("no pin matched the leaf certificate"),
        Err(reason) => MatchResult::rejected(reason),
    }
}

fn match_public_keys(chain: &[CertificateDer<'_>], config: &SslConfig) -> MatchResult {
    for (depth, cert) in chain.iter().enumerate() {
        let spki = match spki_der(cert) {
            Ok(spki) => spki,
            Err(reason) => {
                return MatchResult::rejected(format!(
                    "certificate at chain depth {}: {}",
                    depth, reason
                ))
            }
        };
        match find_digest_match(&config.pins, &spki) {
            Ok(Some(pin)) => {
                return MatchResult::matched(
                    pin,
                    format!("pin matched public key at chain depth {}", depth),
                )
            }
            Ok(None) => {}
            Err(reason) => return MatchResult::rejected(reason),
        }
    }
    MatchResult::rejected("no pin matched any public key in the presented chain")
}

fn match_chain(chain: &[CertificateDer<'_>], config: &SslConfig) -> MatchResult {
    let mut reference = Vec::with_capacity(config.pins.len());
    for pin in &config.pins {
        match pin.certificate_der() {
            Ok(der) => reference.push(der),
            Err(e) => return MatchResult::rejected(format!("reference chain unusable: {}", e)),
        }
    }

    if reference.len() != chain.len() {
        return MatchResult::rejected(format!(
            "presented chain has {} certificates, reference has {}",
            chain.len(),
            reference.len()
        ));
    }

    for (depth, (presented, expected)) in chain.iter().zip(&reference).enumerate() {
        if presented.as_ref() != expected.as_slice() {
            return MatchResult::rejected(format!(
                "certificate at chain depth {} differs from reference",
                depth
            ));
        }
    }

    // Whole-chain match is attributed to the leaf pin
    MatchResult::matched(
        config.pins[0].clone(),
        "presented chain is byte-identical to the reference chain",
    )
}

/// Extract the DER-encoded SubjectPublicKeyInfo from a certificate.
fn spki_der(cert: &CertificateDer<'_>) -> Result<Vec<u8>, String> {
    match x509_parser::parse_x509_certificate(cert.as_ref()) {
        Ok((_, parsed)) => Ok(parsed.public_key().raw.to_vec()),
        Err(e) => Err(format!("certificate could not be parsed: {}", e)),
    }
}

/// First pin whose digest equals the digest of `input` under its own
/// algorithm. An undecodable pin value aborts the search (fail closed).
fn find_digest_match(pins: &[Pin], input: &[u8]) -> Result<Option<Pin>, String> {
    for pin in pins {
        let expected = pin
            .digest_bytes()
            .map_err(|e| format!("unusable pin value: {}", e))?;
        if digest(pin.algorithm, input) == expected {
            return Ok(Some(pin.clone()));
        }
    }
    Ok(None)
}

fn digest(algorithm: PinAlgorithm, input: &[u8]) -> Vec<u8> {
    match algorithm {
        PinAlgorithm::Sha256 => Sha256::digest(input).to_vec(),
        PinAlgorithm::Sha512 => Sha512::digest(input).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    fn test_cert() -> (CertificateDer<'static>, Vec<u8>) {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let der = cert.der().clone().into_owned();
        let spki = spki_der(&der).unwrap();
        (der, spki)
    }

    fn spki_pin(spki: &[u8]) -> Pin {
        Pin::new(
            PinAlgorithm::Sha256,
            BASE64_STANDARD.encode(Sha256::digest(spki)),
        )
    }

    #[test]
    fn test_public_key_hash_accepts_matching_leaf() {
        let (cert, spki) = test_cert();
        let config = SslConfig::public_key_hash(vec![spki_pin(&spki)]);

        let result = evaluate(&[cert], &config);
        assert!(result.matched);
        assert!(result.pinning_enabled);
        assert!(result.matched_pin.is_some());
    }

    #[test]
    fn test_public_key_hash_accepts_matching_intermediate() {
        let (leaf, _) = test_cert();
        let (intermediate, inter_spki) = test_cert();
        let config = SslConfig::public_key_hash(vec![spki_pin(&inter_spki)]);

        let result = evaluate(&[leaf, intermediate], &config);
        assert!(result.matched);
        assert!(result.reason.contains("depth 1"));
    }

    #[test]
    fn test_public_key_hash_rejects_unmatched_chain() {
        let (cert, _) = test_cert();
        let wrong = Pin::new(
            PinAlgorithm::Sha256,
            BASE64_STANDARD.encode(Sha256::digest(b"some other key")),
        );
        let config = SslConfig::public_key_hash(vec![wrong]);

        let result = evaluate(&[cert], &config);
        assert!(!result.matched);
        assert!(result.matched_pin.is_none());
    }

    #[test]
    fn test_empty_pin_set_is_trivially_accepted_but_distinguishable() {
        let (cert, _) = test_cert();
        let result = evaluate(&[cert], &SslConfig::disabled());
        assert!(result.matched);
        assert!(!result.pinning_enabled);
        assert!(result.matched_pin.is_none());
    }

    #[test]
    fn test_empty_chain_fails_closed() {
        let (_, spki) = test_cert();
        let config = SslConfig::public_key_hash(vec![spki_pin(&spki)]);
        let result = evaluate(&[], &config);
        assert!(!result.matched);
    }

    #[test]
    fn test_malformed_certificate_fails_closed() {
        let garbage = CertificateDer::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let (_, spki) = test_cert();
        let config = SslConfig::public_key_hash(vec![spki_pin(&spki)]);

        let result = evaluate(&[garbage], &config);
        assert!(!result.matched);
        assert!(result.reason.contains("parse"));
    }

    #[test]
    fn test_leaf_hash_over_full_der() {
        let (cert, _) = test_cert();
        let pin = Pin::new(
            PinAlgorithm::Sha256,
            BASE64_STANDARD.encode(Sha256::digest(cert.as_ref())),
        );
        let config = SslConfig {
            mode: PinMode::LeafHash,
            pins: vec![pin],
            leaf_input: LeafInput::Certificate,
        };

        assert!(evaluate(&[cert], &config).matched);
    }

    #[test]
    fn test_leaf_hash_ignores_intermediates() {
        let (leaf, _) = test_cert();
        let (intermediate, inter_spki) = test_cert();
        let config = SslConfig {
            mode: PinMode::LeafHash,
            pins: vec![spki_pin(&inter_spki)],
            leaf_input: LeafInput::PublicKey,
        };

        // Pin targets the intermediate key, leaf-hash only looks at the leaf
        let result = evaluate(&[leaf, intermediate], &config);
        assert!(!result.matched);
    }

    #[test]
    fn test_sha512_pins() {
        let (cert, spki) = test_cert();
        let pin = Pin::new(
            PinAlgorithm::Sha512,
            BASE64_STANDARD.encode(Sha512::digest(&spki)),
        );
        let config = SslConfig::public_key_hash(vec![pin]);

        assert!(evaluate(&[cert], &config).matched);
    }

    #[test]
    fn test_chain_mode_requires_identical_chain() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let der = cert.der().clone().into_owned();

        let reference = Pin::new(PinAlgorithm::Sha256, cert.pem());
        let config = SslConfig {
            mode: PinMode::Chain,
            pins: vec![reference],
            leaf_input: LeafInput::default(),
        };

        assert!(evaluate(std::slice::from_ref(&der), &config).matched);

        // A different certificate must not match
        let (other, _) = test_cert();
        assert!(!evaluate(&[other], &config).matched);

        // A longer presented chain must not match either
        let (extra, _) = test_cert();
        assert!(!evaluate(&[der, extra], &config).matched);
    }
}

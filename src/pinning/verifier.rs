//! rustls server-trust interception
//!
//! `PinningVerifier` replaces the default trust decision: with pins
//! configured, the pin matcher alone decides; with an empty pin set it
//! delegates to a webpki verifier over the platform root store. Either way
//! the outcome is written into the shared validation slot before the
//! handshake continues or aborts, so the decision stays inspectable after
//! the fact.

use super::matcher;
use super::result::ValidationResult;
use crate::config::SslConfig;
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::{Arc, Mutex};

/// Shared slot the verifier records its decision into. Cleared by the
/// session on timeout so an in-progress evaluation is discarded rather
/// than reported.
pub(crate) type ValidationSlot = Arc<Mutex<Option<ValidationResult>>>;

pub(crate) struct PinningVerifier {
    config: SslConfig,
    slot: ValidationSlot,
    /// Present only when pinning is disabled (empty pin set)
    trust_store: Option<Arc<WebPkiServerVerifier>>,
}

impl PinningVerifier {
    pub(crate) fn new(config: SslConfig, slot: ValidationSlot) -> Result<Self> {
        let trust_store = if config.pinning_enabled() {
            None
        } else {
            Some(platform_verifier()?)
        };
        Ok(Self {
            config,
            slot,
            trust_store,
        })
    }

    fn record(&self, result: ValidationResult) {
        *self.slot.lock().expect("validation slot poisoned") = Some(result);
    }
}

impl std::fmt::Debug for PinningVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinningVerifier")
            .field("mode", &self.config.mode)
            .field("pins", &self.config.pins.len())
            .field("pinning_enabled", &self.config.pinning_enabled())
            .finish()
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        if let Some(trust_store) = &self.trust_store {
            // Pinning opted out: standard trust evaluation decides
            let outcome = trust_store.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            );
            self.record(ValidationResult::trust_store(
                &chain,
                outcome.as_ref().err().map(|e| e.to_string()),
            ));
            return outcome;
        }

        let result = matcher::evaluate(&chain, &self.config);
        let matched = result.matched;
        let reason = result.reason.clone();
        self.record(ValidationResult::from_match(&chain, &result));

        if matched {
            tracing::debug!(server = ?server_name, "certificate pin matched");
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(server = ?server_name, %reason, "certificate pinning rejected chain");
            Err(rustls::Error::General(format!("pinning failed: {}", reason)))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Webpki verifier over the platform root store, falling back to the
/// bundled Mozilla roots when the native store yields nothing.
fn platform_verifier() -> Result<Arc<WebPkiServerVerifier>> {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    for cert in result.certs {
        let _ = store.add_parsable_certificates(std::iter::once(cert));
    }

    if store.is_empty() {
        store
            .roots
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    WebPkiServerVerifier::builder(Arc::new(store))
        .build()
        .map_err(|e| Error::Tls(format!("failed to build trust-store verifier: {}", e)))
}

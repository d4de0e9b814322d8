//! Certificate pinning
//!
//! This module handles:
//! * Pin evaluation against a presented certificate chain
//! * Interception of the rustls server-trust decision
//! * Recording the validation outcome for diagnostics

mod matcher;
mod result;
mod verifier;

pub use matcher::evaluate;
pub use result::{MatchResult, ValidationResult};
pub(crate) use verifier::PinningVerifier;

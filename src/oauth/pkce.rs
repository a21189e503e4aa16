//! PKCE (RFC 7636), S256 only

use crate::utils::crypto::generate_nonce;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

pub const CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind a verifier; encodes to 43 characters
const VERIFIER_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    #[must_use]
    pub fn generate() -> Self {
        Self::from_verifier(generate_nonce(VERIFIER_BYTES))
    }

    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    #[must_use]
    pub fn into_verifier(self) -> String {
        self.verifier
    }
}

fn compute_s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

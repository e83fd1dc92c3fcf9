//! PKCE (RFC 7636) verifier/challenge generation for the authorization-code
//! flow. Only the S256 method is supported.

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy behind the verifier. Encodes to 64 base64url chars,
/// comfortably above the 43-char RFC minimum.
const VERIFIER_ENTROPY_BYTES: usize = 48;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier from the OS RNG and derive its S256
    /// challenge. A pair is scoped to exactly one authorization request.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let verifier = engine.encode(bytes);
        let challenge = challenge_for(&verifier);
        Self { verifier, challenge }
    }
}

/// S256 challenge for a given verifier: base64url(sha256(ascii(verifier))).
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

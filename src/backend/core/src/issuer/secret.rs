//! API-key secret material.
//!
//! A secret is 32 bytes from the thread-local CSPRNG (seeded from the OS),
//! rendered as `<prefix><url-safe base64>`. Only the SHA-256 hex digest is
//! ever stored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes per secret.
pub const SECRET_BYTES: usize = 32;

/// A freshly generated secret and its stored digest.
#[derive(Clone)]
pub struct GeneratedSecret {
    pub plaintext: String,
    pub hash: String,
}

impl std::fmt::Debug for GeneratedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSecret")
            .field("plaintext", &"[REDACTED]")
            .field("hash", &self.hash)
            .finish()
    }
}

pub fn generate_secret(prefix: &str) -> GeneratedSecret {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let plaintext = format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes));
    let hash = hash_secret(&plaintext);
    GeneratedSecret { plaintext, hash }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret against a stored digest without
/// short-circuiting on the first differing byte.
pub fn verify_secret(presented: &str, stored_hash: &str) -> bool {
    let computed = hash_secret(presented);
    let (a, b) = (computed.as_bytes(), stored_hash.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

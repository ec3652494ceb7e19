//! # Content Digests
//!
//! SHA-256 digests over [`CanonicalBytes`]. The canonical event hash and
//! the idempotency request hash are both [`ContentDigest`] values rendered
//! as lowercase hex.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::ValidationError;

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    /// The raw 32-byte digest value.
    pub bytes: [u8; 32],
}

impl ContentDigest {
    /// Wrap raw digest bytes.
    pub fn sha256(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Return the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        if s.len() != 64 {
            return Err(ValidationError::InvalidDigest(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| ValidationError::InvalidDigest("non-ascii input".into()))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|e| ValidationError::InvalidDigest(format!("position {}: {e}", i * 2)))?;
        }
        Ok(Self { bytes })
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

/// Compute the SHA-256 digest of canonical bytes.
pub fn sha256_digest(data: &CanonicalBytes) -> ContentDigest {
    ContentDigest::sha256(sha256_raw(data.as_bytes()))
}

/// SHA-256 over arbitrary bytes. Used where no JSON structure exists,
/// e.g. an empty request body.
pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

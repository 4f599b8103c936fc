//! # Envelope Format
//!
//! An envelope is the self-describing payload stored in place of a sensitive
//! field. It carries everything needed to decrypt except the master key.
//!
//! ## Wire format
//!
//! ```text
//! ┌─────────────┬───────────┬────────────────┬────────────────────┐
//! │  Salt (64B) │  IV (16B) │ Auth Tag (16B) │ Ciphertext (N B)   │
//! └─────────────┴───────────┴────────────────┴────────────────────┘
//! ```
//!
//! The byte string is hex-encoded, so a stored envelope is `192 + 2*N`
//! characters long.

use crate::error::CryptoError;

/// Length of the per-envelope PBKDF2 salt.
pub const SALT_LEN: usize = 64;

/// Length of the AES-GCM initialization vector.
pub const IV_LEN: usize = 16;

/// Length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Fixed prefix preceding the ciphertext.
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN + TAG_LEN;

/// A parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serializes to `salt ‖ iv ‖ tag ‖ ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Splits raw envelope bytes at their fixed offsets.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < HEADER_LEN {
            return Err(CryptoError::MalformedEnvelope {
                reason: format!("{} bytes, need at least {HEADER_LEN}", data.len()),
            });
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut envelope = Envelope {
            salt: [0u8; SALT_LEN],
            iv: [0u8; IV_LEN],
            tag: [0u8; TAG_LEN],
            ciphertext: ciphertext.to_vec(),
        };
        envelope.salt.copy_from_slice(salt);
        envelope.iv.copy_from_slice(iv);
        envelope.tag.copy_from_slice(tag);

        Ok(envelope)
    }

    /// Hex encoding used for storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parses a stored hex envelope.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| CryptoError::MalformedEnvelope {
            reason: format!("invalid hex: {e}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Expected hex length of the envelope for a plaintext of `plaintext_len` bytes.
    ///
    /// GCM is a stream mode, so ciphertext and plaintext lengths are equal.
    pub const fn hex_len(plaintext_len: usize) -> usize {
        2 * (HEADER_LEN + plaintext_len)
    }
}

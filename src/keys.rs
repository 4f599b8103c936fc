//! # Master Key
//!
//! The master key is the single long-lived secret every per-envelope key is
//! derived from. It is supplied hex-encoded (normally through an environment
//! variable) and held in zeroizing memory for the life of the process.
//!
//! A process without a configured key cannot build a
//! [`crate::crypto::FieldCipher`]. There is no generated fallback key.

use crate::error::ConfigError;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

/// Recommended decoded master key length (256 bits).
pub const RECOMMENDED_KEY_LEN: usize = 32;

/// Length of the hex fingerprint shown to operators.
const FINGERPRINT_LEN: usize = 16;

/// Validated master secret.
///
/// PBKDF2 consumes the hex text itself rather than the decoded bytes, so
/// envelopes written by earlier deployments of the same key stay readable.
pub struct MasterKey {
    secret: Zeroizing<String>,
}

impl MasterKey {
    /// Validates a hex-encoded master key.
    pub fn from_hex(secret: &str) -> Result<Self, ConfigError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(ConfigError::InvalidMasterKey {
                reason: "key is empty".to_string(),
            });
        }

        let decoded = Zeroizing::new(hex::decode(secret).map_err(|e| {
            ConfigError::InvalidMasterKey {
                reason: format!("key must be hex-encoded: {e}"),
            }
        })?);

        if decoded.len() < RECOMMENDED_KEY_LEN {
            tracing::warn!(
                key_bytes = decoded.len(),
                recommended = RECOMMENDED_KEY_LEN,
                "master key is shorter than recommended"
            );
        }

        Ok(Self {
            secret: Zeroizing::new(secret.to_string()),
        })
    }

    /// Reads the master key from an environment variable.
    ///
    /// An unset or blank variable is a fatal configuration error.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        let value = Zeroizing::new(std::env::var(var).unwrap_or_default());
        if value.trim().is_empty() {
            return Err(ConfigError::MissingMasterKey {
                var: var.to_string(),
            });
        }
        Self::from_hex(&value)
    }

    /// Generates a fresh random 256-bit key, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; RECOMMENDED_KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self {
            secret: Zeroizing::new(hex::encode(&bytes[..])),
        }
    }

    /// The PBKDF2 password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    /// The hex text of the key. Only `keygen` should ever print this.
    pub fn expose_hex(&self) -> &str {
        &self.secret
    }

    /// Short identifier of the key, safe to log and compare across hosts.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::derive_key("fieldseal v1 master key fingerprint", self.as_bytes());
        hex::encode(&digest[..FINGERPRINT_LEN / 2])
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

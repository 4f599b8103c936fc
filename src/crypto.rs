//! # Cryptographic Operations
//!
//! AES-256-GCM authenticated encryption for individual document fields.
//! Every call draws a fresh 64-byte salt and 16-byte IV, derives a one-off
//! 256-bit key with PBKDF2-HMAC-SHA512 from the master key and that salt,
//! and packs everything into a self-describing [`Envelope`].
//!
//! [`FieldCipher`] holds only the read-only master key, so it is `Send + Sync`
//! and can be shared behind an `Arc` without locking.

use crate::config::Settings;
use crate::envelope::{Envelope, IV_LEN, SALT_LEN, TAG_LEN};
use crate::error::{CryptoError, Result};
use crate::keys::MasterKey;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use zeroize::Zeroizing;

/// Default PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length for AES-256.
const KEY_LEN: usize = 32;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Derives the per-envelope key from the master secret and salt.
fn derive_key(master: &MasterKey, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha512>(master.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Encrypts and decrypts field values under a single master key.
#[derive(Debug)]
pub struct FieldCipher {
    master: MasterKey,
    iterations: u32,
}

impl FieldCipher {
    /// Builds a cipher using the default iteration count.
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Builds a cipher with an explicit PBKDF2 iteration count.
    ///
    /// Envelopes do not record the count, so every reader must agree on it.
    pub fn with_iterations(master: MasterKey, iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(CryptoError::InvalidIterations.into());
        }
        Ok(Self { master, iterations })
    }

    /// Builds a cipher from settings, reading the master key from the
    /// configured environment variable.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let master = MasterKey::from_env(&settings.master_key_env)?;
        Self::with_iterations(master, settings.kdf_iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Fingerprint of the master key in use.
    pub fn fingerprint(&self) -> String {
        self.master.fingerprint()
    }

    /// Encrypts `plaintext` into a hex envelope.
    ///
    /// Empty input is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = derive_key(&self.master, &salt, self.iterations);
        let cipher =
            Aes256Gcm16::new_from_slice(&key[..]).map_err(|_| CryptoError::InvalidKeyLength)?;

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut envelope = Envelope {
            salt,
            iv,
            tag: [0u8; TAG_LEN],
            ciphertext: buffer,
        };
        envelope.tag.copy_from_slice(&tag);

        tracing::debug!(
            plaintext_len = plaintext.len(),
            envelope_len = Envelope::hex_len(plaintext.len()),
            "encrypted field"
        );

        Ok(envelope.to_hex())
    }

    /// Decrypts an envelope, returning `None` when it cannot be authenticated.
    ///
    /// Empty input is returned unchanged. Failures are logged with their
    /// reason and never surface partial plaintext.
    pub fn decrypt(&self, envelope: &str) -> Option<String> {
        match self.try_decrypt(envelope) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %self.fingerprint(),
                    "field decryption failed"
                );
                None
            }
        }
    }

    /// Decrypts an envelope, reporting why it failed.
    pub fn try_decrypt(&self, envelope: &str) -> std::result::Result<String, CryptoError> {
        if envelope.is_empty() {
            return Ok(String::new());
        }

        let envelope = Envelope::from_hex(envelope)?;

        let key = derive_key(&self.master, &envelope.salt, self.iterations);
        let cipher =
            Aes256Gcm16::new_from_slice(&key[..]).map_err(|_| CryptoError::InvalidKeyLength)?;

        let mut buffer = Zeroizing::new(envelope.ciphertext);
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&envelope.iv),
                b"",
                &mut buffer[..],
                Tag::<U16>::from_slice(&envelope.tag),
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let plaintext =
            std::str::from_utf8(&buffer[..]).map_err(|_| CryptoError::InvalidUtf8)?;

        tracing::debug!(plaintext_len = plaintext.len(), "decrypted field");
        Ok(plaintext.to_string())
    }

    /// [`encrypt`](Self::encrypt) with `None` passed through.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// [`decrypt`](Self::decrypt) with `None` passed through.
    pub fn decrypt_opt(&self, envelope: Option<&str>) -> Option<String> {
        envelope.and_then(|e| self.decrypt(e))
    }
}

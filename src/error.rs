//! # Error Types
//!
//! Structured error hierarchy for the field encryption service using `thiserror`.
//! Variants carry enough context for diagnostics but never key material or
//! plaintext.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes.
#[derive(Error, Debug)]
pub enum FieldSealError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {message}")]
    Validation { message: String },

    #[error("master key not configured: environment variable {var} is unset or empty")]
    MissingMasterKey { var: String },

    #[error("invalid master key: {reason}")]
    InvalidMasterKey { reason: String },

    #[error("collection '{0}' is not defined in the configuration")]
    UnknownCollection(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: invalid key length")]
    InvalidKeyLength,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: authentication tag mismatch (corrupted or wrong key)")]
    DecryptionFailed,

    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("decrypted field is not valid UTF-8")]
    InvalidUtf8,

    #[error("key derivation iterations must be greater than 0")]
    InvalidIterations,

    #[error("rotation aborted: field '{field}' could not be decrypted with the current key")]
    RotationFailed { field: String },

    #[error("{file}: {count} sealed field(s) could not be decrypted; refusing to overwrite it")]
    UnreadableDocument { file: String, count: u64 },
}

/// Errors applying field hooks to documents or moving them on and off disk.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("field '{field}' holds a nested object or array and cannot be encrypted")]
    UnsupportedValue { field: String },

    #[error("{files} documents cannot be printed to stdout; choose an output directory")]
    StdoutNeedsSingleFile { files: usize },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FieldSealError>;

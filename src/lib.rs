//! # fieldseal
//!
//! Field-level authenticated encryption at rest for JSON documents.
//!
//! Sensitive scalar fields (SSNs, phone numbers, ...) are replaced by
//! self-describing AES-256-GCM envelopes. Each envelope carries its own
//! PBKDF2 salt and IV, so only the master key has to be managed.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────┐    ┌───────────┐
//!   │   config   │    │   batch   │──── document (JSON files)
//!   └─────┬──────┘    └─────┬─────┘
//!         │                 ▼
//!         │          ┌────────────┐
//!         │          │ middleware │  pre / post / rotate / migrate
//!         │          └─────┬──────┘
//!         ▼                ▼
//!   ┌───────────┐   ┌─────────────┐   ┌──────────┐
//!   │ MasterKey │──▶│ FieldCipher │──▶│ Envelope │
//!   └───────────┘   └─────────────┘   └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fieldseal::{create_encryption_middleware, FieldCipher, MasterKey};
//!
//! let cipher = Arc::new(FieldCipher::new(MasterKey::from_env("FIELDSEAL_MASTER_KEY")?));
//! let hooks = create_encryption_middleware(cipher, ["ssn", "contact.phone"])?;
//!
//! let mut user = serde_json::json!({"name": "Ada", "ssn": "123-45-6789"});
//! hooks.pre(&mut user)?;   // before save
//! hooks.post(&mut user);   // after load
//! ```

pub mod batch;
pub mod config;
pub mod crypto;
pub mod document;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod middleware;
pub mod sealed;

pub use crypto::FieldCipher;
pub use envelope::Envelope;
pub use error::{FieldSealError, Result};
pub use keys::MasterKey;
pub use middleware::{create_encryption_middleware, EncryptionMiddleware, HookReport};
pub use sealed::{Field, Sealed};

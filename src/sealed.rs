//! # Sealed Values
//!
//! An encrypted field is stored as a tagged JSON object rather than a string
//! with a magic prefix:
//!
//! ```json
//! { "ssn": { "$sealed": "a1b2...e9" }, "name": "Ada" }
//! ```
//!
//! Any JSON string is plaintext, including one that happens to begin with
//! `encrypted:`. Typed records can use [`Field`] directly.

use crate::crypto::FieldCipher;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key marking a sealed object.
pub const SEALED_KEY: &str = "$sealed";

/// An encrypted field value holding a hex envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sealed {
    #[serde(rename = "$sealed")]
    envelope: String,
}

impl Sealed {
    pub fn new(envelope: String) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    /// Recognises the `{"$sealed": "<hex>"}` shape and nothing else.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) if map.len() == 1 => map
                .get(SEALED_KEY)
                .and_then(Value::as_str)
                .map(|e| Self::new(e.to_string())),
            _ => None,
        }
    }

    pub fn is_sealed(value: &Value) -> bool {
        Self::from_value(value).is_some()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(1);
        map.insert(SEALED_KEY.to_string(), Value::String(self.envelope.clone()));
        Value::Object(map)
    }
}

/// A field in a typed record that is either plaintext or sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Sealed(Sealed),
    Plain(String),
}

impl Field {
    pub fn is_sealed(&self) -> bool {
        matches!(self, Field::Sealed(_))
    }

    /// Seals a plain value. Sealed values and empty strings are returned as is.
    pub fn seal(&self, cipher: &FieldCipher) -> Result<Field> {
        match self {
            Field::Plain(p) if !p.is_empty() => Ok(Field::Sealed(Sealed::new(cipher.encrypt(p)?))),
            other => Ok(other.clone()),
        }
    }

    /// Opens the value. `None` means the field is unavailable.
    pub fn open(&self, cipher: &FieldCipher) -> Option<String> {
        match self {
            Field::Sealed(s) => cipher.decrypt(s.envelope()),
            Field::Plain(p) => Some(p.clone()),
        }
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Plain(s)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Plain(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKey;
    use serde_json::json;

    fn cipher() -> FieldCipher {
        FieldCipher::with_iterations(MasterKey::from_hex(&"00".repeat(32)).unwrap(), 1_000)
            .unwrap()
    }

    #[test]
    fn recognises_only_the_exact_shape() {
        assert!(Sealed::is_sealed(&json!({"$sealed": "abcd"})));
        assert!(!Sealed::is_sealed(&json!({"$sealed": "abcd", "x": 1})));
        assert!(!Sealed::is_sealed(&json!({"$sealed": 42})));
        assert!(!Sealed::is_sealed(&json!("encrypted:abcd")));
        assert!(!Sealed::is_sealed(&json!(null)));
    }

    #[test]
    fn value_form_matches_serde_form() {
        let sealed = Sealed::new("abcd".to_string());
        assert_eq!(sealed.to_value(), serde_json::to_value(&sealed).unwrap());
        assert_eq!(Sealed::from_value(&sealed.to_value()), Some(sealed));
    }

    #[test]
    fn field_deserializes_both_forms() {
        let plain: Field = serde_json::from_value(json!("encrypted:abcd")).unwrap();
        assert_eq!(plain, Field::Plain("encrypted:abcd".to_string()));

        let sealed: Field = serde_json::from_value(json!({"$sealed": "abcd"})).unwrap();
        assert!(sealed.is_sealed());
    }

    #[test]
    fn field_seal_and_open() {
        let c = cipher();
        let field = Field::from("123-45-6789");
        let sealed = field.seal(&c).unwrap();
        assert!(sealed.is_sealed());
        assert_eq!(sealed.open(&c).as_deref(), Some("123-45-6789"));

        // already sealed stays one layer deep
        assert_eq!(sealed.seal(&c).unwrap(), sealed);
    }

    #[test]
    fn empty_plain_field_is_not_sealed() {
        let c = cipher();
        assert_eq!(Field::from("").seal(&c).unwrap(), Field::from(""));
    }

    #[test]
    fn unreadable_sealed_field_opens_to_none() {
        let c = cipher();
        let bogus = Field::Sealed(Sealed::new("00".repeat(100)));
        assert_eq!(bogus.open(&c), None);
    }
}

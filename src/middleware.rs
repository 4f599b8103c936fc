//! # Encryption Middleware
//!
//! Save/load hooks that seal a fixed set of fields in JSON documents.
//!
//! - [`EncryptionMiddleware::pre`] runs before persistence and seals every
//!   listed field that still holds plaintext. Already sealed fields are left
//!   alone, so running it twice never double-encrypts.
//! - [`EncryptionMiddleware::post`] runs after loading a single record or an
//!   array of records and opens only fields that are actually sealed.
//!
//! Field names may be dotted paths (`contact.phone`) into nested objects.
//! Mutating passes plan every change before applying any, so a failure
//! leaves the input untouched.

use crate::crypto::FieldCipher;
use crate::envelope::Envelope;
use crate::error::{ConfigError, CryptoError, DocumentError, Result};
use crate::sealed::Sealed;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

/// Prefix used by the old string convention for encrypted fields.
pub const LEGACY_PREFIX: &str = "encrypted:";

/// A dotted path to a field inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> std::result::Result<Self, ConfigError> {
        let raw = raw.trim();
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if raw.is_empty() || segments.iter().any(String::is_empty) {
            return Err(ConfigError::Validation {
                message: format!("invalid field path '{raw}'"),
            });
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Renders a JSON number the way JavaScript's `String(n)` does: integral
/// floats lose their `.0`, and magnitudes outside `[1e-6, 1e21)` use an
/// exponent with an explicit sign.
fn number_text(n: &Number) -> String {
    let Some(f) = n.as_f64().filter(|_| n.is_f64()) else {
        return n.to_string();
    };
    if f == 0.0 {
        return "0".to_string();
    }
    let magnitude = f.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{f}");
    }
    let exp = format!("{f:e}");
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
        _ => exp,
    }
}

fn field<'a>(record: &'a Map<String, Value>, path: &FieldPath) -> Option<&'a Value> {
    let (last, parents) = path.segments.split_last()?;
    let mut current = record;
    for segment in parents {
        current = current.get(segment)?.as_object()?;
    }
    current.get(last)
}

fn field_mut<'a>(record: &'a mut Map<String, Value>, path: &FieldPath) -> Option<&'a mut Value> {
    let (last, parents) = path.segments.split_last()?;
    let mut current = record;
    for segment in parents {
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    current.get_mut(last)
}

/// Counts of what a hook pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HookReport {
    /// Fields newly sealed (or re-sealed by rotation, or migrated).
    pub sealed: u64,
    /// Sealed fields opened back to plaintext.
    pub opened: u64,
    /// Fields left as they were because they were already in the target form.
    pub skipped: u64,
    /// Sealed fields that could not be decrypted and were set to `null`.
    pub unavailable: u64,
}

impl AddAssign for HookReport {
    fn add_assign(&mut self, rhs: Self) {
        self.sealed += rhs.sealed;
        self.opened += rhs.opened;
        self.skipped += rhs.skipped;
        self.unavailable += rhs.unavailable;
    }
}

struct Change<'p> {
    path: &'p FieldPath,
    value: Value,
}

type Plan<'p> = (Vec<Change<'p>>, HookReport);

/// Field-level save/load hooks bound to one cipher and field list.
#[derive(Debug, Clone)]
pub struct EncryptionMiddleware {
    cipher: Arc<FieldCipher>,
    fields: Vec<FieldPath>,
}

/// Builds the hook pair for `fields_to_encrypt`.
///
/// Duplicate paths are collapsed; an empty or malformed path is rejected.
pub fn create_encryption_middleware<I, S>(
    cipher: Arc<FieldCipher>,
    fields_to_encrypt: I,
) -> Result<EncryptionMiddleware>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut fields: Vec<FieldPath> = Vec::new();
    for raw in fields_to_encrypt {
        let path = FieldPath::parse(raw.as_ref())?;
        if !fields.contains(&path) {
            fields.push(path);
        }
    }
    Ok(EncryptionMiddleware { cipher, fields })
}

impl EncryptionMiddleware {
    pub fn fields(&self) -> &[FieldPath] {
        &self.fields
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    /// Before-save hook. Seals every listed plaintext field of a record or
    /// of each record in an array.
    ///
    /// Missing, `null` and empty fields pass through. Numbers and booleans
    /// are sealed in their textual form.
    pub fn pre(&self, record: &mut Value) -> Result<HookReport> {
        let report = self.transform(record, |r| self.plan_seal(r))?;
        tracing::debug!(
            sealed = report.sealed,
            skipped = report.skipped,
            "pre hook"
        );
        Ok(report)
    }

    /// Runs [`pre`](Self::pre), then hands the sealed record to `next`
    /// (the persistence step).
    pub fn save_with<T, F>(&self, record: &mut Value, next: F) -> Result<T>
    where
        F: FnOnce(&Value) -> Result<T>,
    {
        self.pre(record)?;
        next(record)
    }

    /// After-load hook. Opens sealed fields of a record or of each record in
    /// an array; non-object array elements are ignored.
    ///
    /// A sealed field that fails to decrypt becomes `null`.
    pub fn post(&self, loaded: &mut Value) -> HookReport {
        let mut report = HookReport::default();
        match loaded {
            Value::Object(record) => report += self.open_record(record),
            Value::Array(items) => {
                for record in items.iter_mut().filter_map(Value::as_object_mut) {
                    report += self.open_record(record);
                }
            }
            _ => {}
        }
        tracing::debug!(
            opened = report.opened,
            unavailable = report.unavailable,
            "post hook"
        );
        report
    }

    /// Re-encrypts every sealed field under `next`.
    ///
    /// All fields are decrypted before anything is written; if one cannot be
    /// decrypted with the current key the input is left unchanged.
    pub fn rotate(&self, record: &mut Value, next: &FieldCipher) -> Result<HookReport> {
        let report = self.transform(record, |r| self.plan_rotate(r, next))?;
        tracing::debug!(rotated = report.sealed, "rotation pass");
        Ok(report)
    }

    /// Converts `encrypted:<hex>` strings from the legacy string convention
    /// into sealed values.
    ///
    /// Only suffixes that parse as a well-formed envelope are converted.
    pub fn migrate_legacy(&self, record: &mut Value) -> Result<HookReport> {
        let report = self.transform(record, |r| Ok(self.plan_migrate(r)))?;
        tracing::debug!(
            migrated = report.sealed,
            skipped = report.skipped,
            "legacy migration pass"
        );
        Ok(report)
    }

    fn open_record(&self, record: &mut Map<String, Value>) -> HookReport {
        let mut report = HookReport::default();
        for path in &self.fields {
            let Some(slot) = field_mut(record, path) else {
                continue;
            };
            let Some(sealed) = Sealed::from_value(slot) else {
                continue;
            };
            match self.cipher.try_decrypt(sealed.envelope()) {
                Ok(plaintext) => {
                    *slot = Value::String(plaintext);
                    report.opened += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        field = %path,
                        error = %e,
                        key = %self.cipher.fingerprint(),
                        "sealed field unavailable"
                    );
                    *slot = Value::Null;
                    report.unavailable += 1;
                }
            }
        }
        report
    }

    fn plan_seal(&self, record: &Map<String, Value>) -> Result<Plan<'_>> {
        let mut changes = Vec::new();
        let mut report = HookReport::default();

        for path in &self.fields {
            let Some(value) = field(record, path) else {
                continue;
            };
            let plaintext = match value {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => number_text(n),
                Value::Bool(b) => b.to_string(),
                Value::Object(_) if Sealed::is_sealed(value) => {
                    report.skipped += 1;
                    continue;
                }
                Value::Object(_) | Value::Array(_) => {
                    return Err(DocumentError::UnsupportedValue {
                        field: path.to_string(),
                    }
                    .into())
                }
            };

            let sealed = Sealed::new(self.cipher.encrypt(&plaintext)?);
            changes.push(Change {
                path,
                value: sealed.to_value(),
            });
            report.sealed += 1;
        }

        Ok((changes, report))
    }

    fn plan_rotate<'s>(
        &'s self,
        record: &Map<String, Value>,
        next: &FieldCipher,
    ) -> Result<Plan<'s>> {
        let mut changes = Vec::new();
        let mut report = HookReport::default();

        for path in &self.fields {
            let Some(sealed) = field(record, path).and_then(Sealed::from_value) else {
                continue;
            };
            let plaintext = self.cipher.try_decrypt(sealed.envelope()).map_err(|e| {
                tracing::warn!(field = %path, error = %e, "rotation aborted");
                CryptoError::RotationFailed {
                    field: path.to_string(),
                }
            })?;
            let resealed = Sealed::new(next.encrypt(&plaintext)?);
            changes.push(Change {
                path,
                value: resealed.to_value(),
            });
            report.sealed += 1;
        }

        Ok((changes, report))
    }

    fn plan_migrate(&self, record: &Map<String, Value>) -> Plan<'_> {
        let mut changes = Vec::new();
        let mut report = HookReport::default();

        for path in &self.fields {
            let Some(Value::String(s)) = field(record, path) else {
                continue;
            };
            let Some(hex) = s.strip_prefix(LEGACY_PREFIX) else {
                continue;
            };
            match Envelope::from_hex(hex) {
                Ok(_) => {
                    changes.push(Change {
                        path,
                        value: Sealed::new(hex.to_string()).to_value(),
                    });
                    report.sealed += 1;
                }
                Err(e) => {
                    tracing::warn!(field = %path, error = %e, "legacy value left as plaintext");
                    report.skipped += 1;
                }
            }
        }

        (changes, report)
    }

    /// Plans changes for every record, then applies them all.
    fn transform<'s, F>(&'s self, target: &mut Value, plan: F) -> Result<HookReport>
    where
        F: Fn(&Map<String, Value>) -> Result<Plan<'s>>,
    {
        let plans = match &*target {
            Value::Object(record) => vec![plan(record)?],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(record) => plan(record),
                    _ => Err(DocumentError::NotAnObject.into()),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(DocumentError::NotAnObject.into()),
        };

        let records: Vec<&mut Map<String, Value>> = match target {
            Value::Array(items) => items.iter_mut().filter_map(Value::as_object_mut).collect(),
            other => other.as_object_mut().into_iter().collect(),
        };

        let mut report = HookReport::default();
        for (record, (changes, partial)) in records.into_iter().zip(plans) {
            for change in changes {
                if let Some(slot) = field_mut(record, change.path) {
                    *slot = change.value;
                }
            }
            report += partial;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKey;
    use serde_json::json;

    fn cipher(hex_key: &str) -> Arc<FieldCipher> {
        Arc::new(
            FieldCipher::with_iterations(MasterKey::from_hex(hex_key).unwrap(), 1_000).unwrap(),
        )
    }

    fn middleware(fields: &[&str]) -> EncryptionMiddleware {
        create_encryption_middleware(cipher(&"00".repeat(32)), fields).unwrap()
    }

    #[test]
    fn pre_seals_listed_fields_only() {
        let mw = middleware(&["ssn", "phone"]);
        let mut doc = json!({"name": "Ada", "ssn": "123-45-6789", "phone": "555-0100"});

        let report = mw.pre(&mut doc).unwrap();
        assert_eq!(report.sealed, 2);
        assert_eq!(doc["name"], "Ada");
        assert!(Sealed::is_sealed(&doc["ssn"]));
        assert!(Sealed::is_sealed(&doc["phone"]));
    }

    #[test]
    fn pre_twice_seals_once() {
        let mw = middleware(&["ssn"]);
        let mut doc = json!({"ssn": "123-45-6789"});

        mw.pre(&mut doc).unwrap();
        let first = doc.clone();
        let report = mw.pre(&mut doc).unwrap();

        assert_eq!(report.sealed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(doc, first);

        let envelope = Sealed::from_value(&doc["ssn"]).unwrap();
        assert_eq!(
            mw.cipher().decrypt(envelope.envelope()).as_deref(),
            Some("123-45-6789")
        );
    }

    #[test]
    fn post_opens_sealed_fields() {
        let mw = middleware(&["ssn"]);
        let mut doc = json!({"ssn": "123-45-6789", "name": "Ada"});
        mw.pre(&mut doc).unwrap();

        let report = mw.post(&mut doc);
        assert_eq!(report.opened, 1);
        assert_eq!(doc, json!({"ssn": "123-45-6789", "name": "Ada"}));
    }

    #[test]
    fn post_never_touches_plaintext() {
        let mw = middleware(&["ssn"]);
        let mut doc = json!({"ssn": "encrypted:deadbeef"});
        let report = mw.post(&mut doc);
        assert_eq!(report, HookReport::default());
        assert_eq!(doc["ssn"], "encrypted:deadbeef");
    }

    #[test]
    fn prefixed_plaintext_is_sealed() {
        let mw = middleware(&["note"]);
        let mut doc = json!({"note": "encrypted:not really"});
        mw.pre(&mut doc).unwrap();
        assert!(Sealed::is_sealed(&doc["note"]));
        mw.post(&mut doc);
        assert_eq!(doc["note"], "encrypted:not really");
    }

    #[test]
    fn post_handles_arrays() {
        let mw = middleware(&["ssn"]);
        let mut docs = json!([{"ssn": "111"}, {"ssn": "222"}, {"other": 1}]);
        let sealed = mw.pre(&mut docs).unwrap();
        assert_eq!(sealed.sealed, 2);

        docs.as_array_mut().unwrap().push(json!("not a record"));
        let opened = mw.post(&mut docs);
        assert_eq!(opened.opened, 2);
        assert_eq!(docs[0]["ssn"], "111");
        assert_eq!(docs[1]["ssn"], "222");
        assert_eq!(docs[3], "not a record");
    }

    #[test]
    fn unreadable_field_becomes_null() {
        let writer = middleware(&["ssn"]);
        let mut doc = json!({"ssn": "123-45-6789"});
        writer.pre(&mut doc).unwrap();

        let reader = create_encryption_middleware(cipher(&"11".repeat(32)), ["ssn"]).unwrap();
        let report = reader.post(&mut doc);
        assert_eq!(report.unavailable, 1);
        assert_eq!(doc["ssn"], Value::Null);
    }

    #[test]
    fn empty_null_and_missing_pass_through() {
        let mw = middleware(&["a", "b", "c"]);
        let mut doc = json!({"a": "", "b": null});
        let report = mw.pre(&mut doc).unwrap();
        assert_eq!(report, HookReport::default());
        assert_eq!(doc, json!({"a": "", "b": null}));
    }

    #[test]
    fn scalars_are_coerced_to_text() {
        let mw = middleware(&["pin", "verified"]);
        let mut doc = json!({"pin": 1234, "verified": true});
        mw.pre(&mut doc).unwrap();
        mw.post(&mut doc);
        assert_eq!(doc, json!({"pin": "1234", "verified": "true"}));
    }

    #[test]
    fn numbers_are_coerced_like_javascript() {
        let cases = [
            (json!(42), "42"),
            (json!(-7), "-7"),
            (json!(1.0), "1"),
            (json!(1.5), "1.5"),
            (json!(-0.0), "0"),
            (json!(1e20), "100000000000000000000"),
            (json!(1e21), "1e+21"),
            (json!(2.5e-7), "2.5e-7"),
        ];
        for (value, expected) in cases {
            let Value::Number(n) = &value else {
                panic!("not a number: {value}");
            };
            assert_eq!(number_text(n), expected, "{value}");
        }

        let mw = middleware(&["balance"]);
        let mut doc = json!({"balance": 1.0});
        mw.pre(&mut doc).unwrap();
        mw.post(&mut doc);
        assert_eq!(doc["balance"], "1");
    }

    #[test]
    fn nested_paths() {
        let mw = middleware(&["contact.phone", "contact.missing.deep"]);
        let mut doc = json!({"contact": {"phone": "555-0100", "city": "Oslo"}});
        mw.pre(&mut doc).unwrap();
        assert!(Sealed::is_sealed(&doc["contact"]["phone"]));
        assert_eq!(doc["contact"]["city"], "Oslo");

        mw.post(&mut doc);
        assert_eq!(doc["contact"]["phone"], "555-0100");
    }

    #[test]
    fn unsupported_value_leaves_record_unchanged() {
        let mw = middleware(&["ssn", "tags"]);
        let mut doc = json!({"ssn": "123", "tags": ["a", "b"]});
        let before = doc.clone();
        let err = mw.pre(&mut doc).unwrap_err();
        assert!(err.to_string().contains("tags"));
        assert_eq!(doc, before);
    }

    #[test]
    fn array_with_bad_element_is_untouched() {
        let mw = middleware(&["ssn"]);
        let mut docs = json!([{"ssn": "1"}, 42]);
        let before = docs.clone();
        assert!(mw.pre(&mut docs).is_err());
        assert_eq!(docs, before);
    }

    #[test]
    fn non_object_record_is_rejected() {
        let mw = middleware(&["ssn"]);
        assert!(mw.pre(&mut json!("just a string")).is_err());
        assert_eq!(mw.post(&mut json!(17)), HookReport::default());
    }

    #[test]
    fn save_with_runs_next_after_sealing() {
        let mw = middleware(&["ssn"]);
        let mut doc = json!({"ssn": "123-45-6789"});
        let stored = mw
            .save_with(&mut doc, |sealed| Ok(serde_json::to_string(sealed)?))
            .unwrap();
        assert!(stored.contains("$sealed"));
        assert!(!stored.contains("123-45-6789"));
    }

    #[test]
    fn save_with_skips_next_on_error() {
        let mw = middleware(&["ssn"]);
        let mut doc = json!({"ssn": {"nested": true}});
        let mut called = false;
        let result = mw.save_with(&mut doc, |_| {
            called = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn rotate_reencrypts_under_new_key() {
        let mw = middleware(&["ssn", "phone"]);
        let mut doc = json!({"ssn": "123-45-6789", "phone": "555-0100"});
        mw.pre(&mut doc).unwrap();

        let next = cipher(&"11".repeat(32));
        let report = mw.rotate(&mut doc, &next).unwrap();
        assert_eq!(report.sealed, 2);

        assert_eq!(mw.clone().post(&mut doc.clone()).unavailable, 2);

        let reader = create_encryption_middleware(next, ["ssn", "phone"]).unwrap();
        reader.post(&mut doc);
        assert_eq!(doc, json!({"ssn": "123-45-6789", "phone": "555-0100"}));
    }

    #[test]
    fn failed_rotation_leaves_record_unchanged() {
        let mw = middleware(&["ssn", "phone"]);
        let mut doc = json!({"ssn": "123-45-6789"});
        mw.pre(&mut doc).unwrap();
        doc["phone"] = Sealed::new("00".repeat(120)).to_value();
        let before = doc.clone();

        let err = mw.rotate(&mut doc, &cipher(&"11".repeat(32))).unwrap_err();
        assert!(err.to_string().contains("phone"));
        assert_eq!(doc, before);
    }

    #[test]
    fn migrate_converts_well_formed_legacy_values() {
        let mw = middleware(&["ssn", "phone"]);
        let envelope = mw.cipher().encrypt("123-45-6789").unwrap();
        let mut doc = json!({
            "ssn": format!("{LEGACY_PREFIX}{envelope}"),
            "phone": "encrypted:call me maybe",
        });

        let report = mw.migrate_legacy(&mut doc).unwrap();
        assert_eq!(report.sealed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(doc["phone"], "encrypted:call me maybe");

        mw.post(&mut doc);
        assert_eq!(doc["ssn"], "123-45-6789");
    }

    #[test]
    fn field_paths_are_validated_and_deduplicated() {
        let c = cipher(&"00".repeat(32));
        assert!(create_encryption_middleware(c.clone(), ["ok", ""]).is_err());
        assert!(create_encryption_middleware(c.clone(), ["a..b"]).is_err());

        let mw = create_encryption_middleware(c, ["ssn", "ssn", "contact.phone"]).unwrap();
        let names: Vec<_> = mw.fields().iter().map(FieldPath::as_str).collect();
        assert_eq!(names, ["ssn", "contact.phone"]);
    }
}

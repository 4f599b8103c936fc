use fieldseal::config::{self, Settings};
use fieldseal::error::{ConfigError, FieldSealError};
use fieldseal::{create_encryption_middleware, Envelope, Field, FieldCipher, MasterKey, Sealed};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const FAST: u32 = 2_000;

fn cipher(hex_key: &str) -> FieldCipher {
    FieldCipher::with_iterations(MasterKey::from_hex(hex_key).unwrap(), FAST).unwrap()
}

#[test]
fn missing_master_key_refuses_to_start() {
    let settings = Settings {
        master_key_env: "FIELDSEAL_IT_UNSET_KEY".to_string(),
        ..Settings::default()
    };
    std::env::remove_var(&settings.master_key_env);

    match FieldCipher::from_settings(&settings) {
        Err(FieldSealError::Config(ConfigError::MissingMasterKey { var })) => {
            assert_eq!(var, "FIELDSEAL_IT_UNSET_KEY")
        }
        other => panic!("expected missing key error, got {other:?}"),
    }
}

#[test]
fn master_key_from_configured_env_var() {
    let cfg = config::parse_config(
        "[settings]\nmaster_key_env = \"FIELDSEAL_IT_KEY_A\"\nkdf_iterations = 2000\n",
    )
    .unwrap();
    std::env::set_var("FIELDSEAL_IT_KEY_A", "00".repeat(32));

    let from_env = FieldCipher::from_settings(&cfg.settings).unwrap();
    assert_eq!(from_env.iterations(), FAST);

    // same key and cost as the direct constructor, so envelopes interoperate
    let envelope = cipher(&"00".repeat(32)).encrypt("123-45-6789").unwrap();
    assert_eq!(from_env.decrypt(&envelope).as_deref(), Some("123-45-6789"));
}

#[test]
fn invalid_master_key_in_env_is_rejected() {
    let settings = Settings {
        master_key_env: "FIELDSEAL_IT_KEY_BAD".to_string(),
        ..Settings::default()
    };
    std::env::set_var(&settings.master_key_env, "correct horse battery staple");
    assert!(matches!(
        FieldCipher::from_settings(&settings),
        Err(FieldSealError::Config(ConfigError::InvalidMasterKey { .. }))
    ));
}

#[test]
fn envelope_length_and_layout() {
    let c = cipher(&"00".repeat(32));
    let envelope = c.encrypt("123-45-6789").unwrap();
    assert_eq!(envelope.len(), Envelope::hex_len(11));
    assert_eq!(envelope.len(), 192 + 2 * 11);

    let parsed = Envelope::from_hex(&envelope).unwrap();
    assert_eq!(parsed.ciphertext.len(), 11);
}

#[test]
fn documents_survive_a_save_load_cycle() {
    let hooks =
        create_encryption_middleware(Arc::new(cipher(&"00".repeat(32))), ["ssn", "contact.phone"])
            .unwrap();

    let original = json!({
        "name": "Ada",
        "ssn": "123-45-6789",
        "contact": {"phone": "555-0100", "city": "London"}
    });

    let mut record = original.clone();
    let stored = hooks
        .save_with(&mut record, |sealed| Ok(serde_json::to_string(sealed)?))
        .unwrap();
    assert!(!stored.contains("123-45-6789"));
    assert!(!stored.contains("555-0100"));
    assert!(stored.contains("London"));

    let mut loaded: serde_json::Value = serde_json::from_str(&stored).unwrap();
    let report = hooks.post(&mut loaded);
    assert_eq!(report.opened, 2);
    assert_eq!(loaded, original);
}

#[test]
fn pre_is_idempotent_across_repeated_saves() {
    let hooks = create_encryption_middleware(Arc::new(cipher(&"00".repeat(32))), ["ssn"]).unwrap();
    let mut record = json!({"ssn": "123-45-6789"});

    for _ in 0..3 {
        hooks.pre(&mut record).unwrap();
    }

    let text = serde_json::to_string(&record).unwrap();
    assert_eq!(text.matches("$sealed").count(), 1);
    hooks.post(&mut record);
    assert_eq!(record["ssn"], "123-45-6789");
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Patient {
    name: String,
    ssn: Field,
}

#[test]
fn typed_records_use_field_wrapper() {
    let c = cipher(&"00".repeat(32));
    let patient = Patient {
        name: "Grace".to_string(),
        ssn: Field::from("987-65-4321"),
    };

    let stored = Patient {
        ssn: patient.ssn.seal(&c).unwrap(),
        name: patient.name.clone(),
    };
    let json = serde_json::to_value(&stored).unwrap();
    assert!(Sealed::is_sealed(&json["ssn"]));

    let back: Patient = serde_json::from_value(json).unwrap();
    assert!(back.ssn.is_sealed());
    assert_eq!(back.ssn.open(&c).as_deref(), Some("987-65-4321"));
    assert_eq!(back.ssn.open(&cipher(&"11".repeat(32))), None);
}

#[test]
fn shared_cipher_across_threads() {
    let hooks = Arc::new(
        create_encryption_middleware(Arc::new(cipher(&"00".repeat(32))), ["ssn"]).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let hooks = Arc::clone(&hooks);
            std::thread::spawn(move || {
                let mut record = json!({"ssn": format!("000-00-000{i}")});
                hooks.pre(&mut record).unwrap();
                hooks.post(&mut record);
                record["ssn"].as_str().unwrap().to_string()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("000-00-000{i}"));
    }
}

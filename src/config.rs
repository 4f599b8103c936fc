//! # Configuration
//!
//! Loads and validates the TOML configuration file. Searches the standard
//! locations in a fixed priority order, then checks every setting before
//! returning. The master key itself never lives in the file; the file only
//! names the environment variable that carries it.

use crate::error::{ConfigError, Result};
use crate::middleware::FieldPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Environment variable read for the master key unless configured otherwise.
pub const DEFAULT_MASTER_KEY_ENV: &str = "FIELDSEAL_MASTER_KEY";

/// Top-level configuration structure.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub collections: BTreeMap<String, Collection>,
}

/// Global settings for key handling.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Environment variable holding the hex-encoded master key.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,

    /// PBKDF2 iterations per envelope. Every reader of a dataset must use the
    /// value it was written with.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

/// A named group of documents sharing one set of sensitive fields.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Collection {
    /// Field names or dotted paths to seal.
    pub fields: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

fn default_master_key_env() -> String {
    DEFAULT_MASTER_KEY_ENV.to_string()
}
fn default_kdf_iterations() -> u32 {
    crate::crypto::PBKDF2_ITERATIONS
}

impl Config {
    /// Field list of a named collection.
    pub fn collection_fields(&self, name: &str) -> std::result::Result<&[String], ConfigError> {
        self.collections
            .get(name)
            .map(|c| c.fields.as_slice())
            .ok_or_else(|| ConfigError::UnknownCollection(name.to_string()))
    }
}

/// Standard configuration file search paths, in descending priority order.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/fieldseal.toml")];
    if let Ok(home) = env::var("HOME") {
        paths.push(PathBuf::from(format!("{home}/.config/fieldseal.toml")));
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(format!("{xdg}/fieldseal.toml")));
    }
    paths.push(PathBuf::from("fieldseal.toml"));
    paths
}

/// Loads configuration from the first config file found in the search path.
pub fn load_config() -> Result<Config> {
    let search = config_search_paths();

    for path in &search {
        if path.exists() {
            return load_config_from(path);
        }
    }

    Err(ConfigError::NotFound { searched: search }.into())
}

/// Like [`load_config`], but falls back to defaults when no file exists.
pub fn load_config_or_default() -> Result<Config> {
    match load_config() {
        Err(crate::error::FieldSealError::Config(ConfigError::NotFound { searched })) => {
            tracing::debug!(?searched, "no config file found, using defaults");
            Ok(Config::default())
        }
        other => other,
    }
}

/// Loads and validates configuration from a specific file path.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;

    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), collections = config.collections.len(), "loaded config");
    Ok(config)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse { source: e })?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates configuration invariants after parsing.
fn validate_config(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.settings.master_key_env.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "master_key_env must name an environment variable".to_string(),
        });
    }

    if config.settings.kdf_iterations == 0 {
        return Err(ConfigError::Validation {
            message: "kdf_iterations must be greater than 0".to_string(),
        });
    }

    for (name, collection) in &config.collections {
        if collection.fields.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("collection '{name}' lists no fields"),
            });
        }
        for field in &collection.fields {
            FieldPath::parse(field).map_err(|_| ConfigError::Validation {
                message: format!("collection '{name}' has invalid field path '{field}'"),
            })?;
        }
    }

    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# fieldseal configuration
#
# The master key is never stored here. Generate one with `fieldseal keygen`
# and export it in the variable named by `master_key_env`.

[settings]
master_key_env = "FIELDSEAL_MASTER_KEY"

# PBKDF2-HMAC-SHA512 rounds per envelope. Changing this makes existing
# envelopes unreadable.
kdf_iterations = 100000

[collections.users]
fields = ["ssn", "phone", "contact.email"]
"#;

/// Generates a default configuration file at the given path.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow::anyhow!("config file already exists: {}", path.display()).into());
    }

    let header = format!(
        "# generated {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, header + CONFIG_TEMPLATE)?;

    Ok(())
}

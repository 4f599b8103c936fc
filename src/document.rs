//! # Document Files
//!
//! JSON documents on disk hold either a single record or an array of
//! records. Writes go through a temporary file in the target directory and
//! a rename, so a crash never leaves a half-sealed file behind.

use crate::error::{DocumentError, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Reads a JSON document file.
pub fn load_documents(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|e| DocumentError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value = serde_json::from_str(&content)?;
    Ok(value)
}

/// A document written to a temporary file next to its destination, waiting
/// to be renamed into place. Dropping it removes the temporary file.
#[derive(Debug)]
pub struct StagedDocument {
    tmp: tempfile::NamedTempFile,
    path: PathBuf,
}

impl StagedDocument {
    /// Final location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the staged file over its destination.
    pub fn commit(self) -> Result<PathBuf> {
        let path = self.path;
        self.tmp.persist(&path).map_err(|e| DocumentError::Write {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(path)
    }
}

/// Serializes `documents` into a temporary file in the directory of `path`.
pub fn stage_documents(path: &Path, documents: &Value) -> Result<StagedDocument> {
    let write_err = |e: std::io::Error| DocumentError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(write_err)?;

    let mut json = serde_json::to_string_pretty(documents)?;
    json.push('\n');

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    Ok(StagedDocument {
        tmp,
        path: path.to_path_buf(),
    })
}

/// Writes a JSON document file atomically.
pub fn save_documents(path: &Path, documents: &Value) -> Result<()> {
    stage_documents(path, documents)?.commit()?;
    Ok(())
}

/// Number of records in a loaded document value.
pub fn record_count(documents: &Value) -> u64 {
    match documents {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).count() as u64,
        Value::Object(_) => 1,
        _ => 0,
    }
}

/// Returns `path` itself if it is a file, or every `*.json` file beneath it.
pub fn collect_json_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(DocumentError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        }
        .into());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

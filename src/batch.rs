//! # Batch Processing
//!
//! Applies a middleware pass to a set of JSON document files. Every file is
//! loaded and transformed in memory first, then every output is staged in a
//! temporary file beside its destination. Only when all of them are staged
//! are they renamed into place, so a failure while transforming or writing
//! leaves every destination untouched. The remaining window is the renames
//! themselves.
//!
//! Opening in place refuses any file with a field the current key cannot
//! decrypt, since writing it back would replace the envelope with `null`.

use crate::crypto::FieldCipher;
use crate::document;
use crate::error::{CryptoError, DocumentError, Result};
use crate::middleware::{EncryptionMiddleware, HookReport};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// The pass to run over each file.
#[derive(Debug, Clone, Copy)]
pub enum BatchAction<'a> {
    Seal,
    Open,
    Migrate,
    Rotate(&'a FieldCipher),
}

impl fmt::Display for BatchAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchAction::Seal => write!(f, "seal"),
            BatchAction::Open => write!(f, "open"),
            BatchAction::Migrate => write!(f, "migrate"),
            BatchAction::Rotate(_) => write!(f, "rotate"),
        }
    }
}

/// Where processed documents go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Overwrite each input file.
    InPlace,
    /// Mirror the input layout under another directory.
    Directory(PathBuf),
    /// Print the document to stdout. Only valid for a single file.
    Stdout,
}

/// Options controlling a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub destination: Destination,
    /// Input root used to compute relative output paths.
    pub root: PathBuf,
    pub progress: bool,
    pub verbose: bool,
}

/// Aggregate result of a batch run.
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub files: u64,
    pub records: u64,
    pub report: HookReport,
    pub duration_ms: u64,
    pub written: Vec<PathBuf>,
}

/// Runs `action` over `files` and writes the results to the destination.
pub fn run_batch(
    files: &[PathBuf],
    action: BatchAction<'_>,
    middleware: &EncryptionMiddleware,
    opts: &BatchOptions,
) -> Result<BatchSummary> {
    let start = Instant::now();
    if opts.destination == Destination::Stdout && files.len() > 1 {
        return Err(DocumentError::StdoutNeedsSingleFile { files: files.len() }.into());
    }

    let pb = if opts.progress {
        create_progress_bar(files.len() as u64, &action.to_string())
    } else {
        ProgressBar::hidden()
    };

    let mut summary = BatchSummary::default();
    let mut processed: Vec<(&PathBuf, Value)> = Vec::with_capacity(files.len());

    for path in files {
        pb.set_message(truncate_path(&path.to_string_lossy(), 40));

        let mut docs = document::load_documents(path)?;
        let report = match action {
            BatchAction::Seal => middleware.pre(&mut docs)?,
            BatchAction::Open => middleware.post(&mut docs),
            BatchAction::Migrate => middleware.migrate_legacy(&mut docs)?,
            BatchAction::Rotate(next) => middleware.rotate(&mut docs, next)?,
        };

        if opts.verbose {
            pb.println(format!(
                "  {} {} sealed {}, opened {}, skipped {}, unavailable {}",
                colored::Colorize::dimmed("·"),
                path.display(),
                report.sealed,
                report.opened,
                report.skipped,
                report.unavailable,
            ));
        }

        if matches!(action, BatchAction::Open)
            && opts.destination == Destination::InPlace
            && report.unavailable > 0
        {
            pb.finish_and_clear();
            return Err(CryptoError::UnreadableDocument {
                file: path.display().to_string(),
                count: report.unavailable,
            }
            .into());
        }

        summary.files += 1;
        summary.records += document::record_count(&docs);
        summary.report += report;
        processed.push((path, docs));
        pb.inc(1);
    }

    pb.finish_and_clear();

    let mut staged = Vec::with_capacity(processed.len());
    for (path, docs) in &processed {
        match &opts.destination {
            Destination::Stdout => {
                println!("{}", serde_json::to_string_pretty(docs)?);
            }
            Destination::InPlace => staged.push(document::stage_documents(path, docs)?),
            Destination::Directory(dir) => {
                let out = output_path(dir, &opts.root, path);
                staged.push(document::stage_documents(&out, docs)?);
            }
        }
    }

    for doc in staged {
        summary.written.push(doc.commit()?);
    }

    summary.duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        action = %action,
        files = summary.files,
        records = summary.records,
        duration_ms = summary.duration_ms,
        "batch complete"
    );
    Ok(summary)
}

/// Maps an input file to its location under `dir`, preserving the layout
/// relative to `root`.
fn output_path(dir: &Path, root: &Path, file: &Path) -> PathBuf {
    match file.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => dir.join(rel),
        _ => dir.join(file.file_name().unwrap_or(file.as_os_str())),
    }
}

fn create_progress_bar(total: u64, action: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "  {{spinner:.green}} {action} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}

fn truncate_path(path: &str, max_len: usize) -> String {
    let count = path.chars().count();
    if count <= max_len {
        path.to_string()
    } else {
        let tail: String = path.chars().skip(count - max_len + 1).collect();
        format!("…{tail}")
    }
}

/// Prints a summary of a completed batch.
pub fn print_batch_summary(action: BatchAction<'_>, summary: &BatchSummary) {
    let report = &summary.report;

    eprintln!();
    eprintln!(
        "  {} {}: {} file(s), {} record(s)",
        colored::Colorize::green("✓"),
        colored::Colorize::bold(action.to_string().as_str()),
        summary.files,
        summary.records,
    );
    eprintln!(
        "    Fields:      {} sealed, {} opened, {} skipped",
        report.sealed, report.opened, report.skipped,
    );
    if report.unavailable > 0 {
        eprintln!(
            "    {} {} field(s) could not be decrypted and were set to null",
            colored::Colorize::yellow("!"),
            report.unavailable,
        );
    }
    eprintln!("    Duration:    {:.2}s", summary.duration_ms as f64 / 1000.0);
}

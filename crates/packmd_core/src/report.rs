use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::error::PackError;
use crate::resolve::to_posix;

/// Outcome of processing one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub file_path: PathBuf,
    pub images_found: usize,
    pub copied: usize,
    pub reused: usize,
    pub skipped_external: usize,
    pub skipped_missing: usize,
    pub name_conflicts: usize,
    pub errors: Vec<String>,
}

impl FileResult {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    pub(crate) fn failed(file_path: impl Into<PathBuf>, error: PackError) -> Self {
        let mut result = Self::new(file_path);
        result.push_error(error);
        result
    }

    pub(crate) fn push_error(&mut self, error: PackError) {
        warn!(file = %self.file_path.display(), "{error}");
        self.errors.push(error.to_string());
    }

    /// No errors and no missing references.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.skipped_missing == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_files: usize,
    pub total_images_found: usize,
    pub total_copied: usize,
    pub total_reused: usize,
    pub total_skipped_external: usize,
    pub total_skipped_missing: usize,
    pub total_name_conflicts: usize,
    pub total_errors: usize,
}

impl RunSummary {
    pub(crate) fn add_document(&mut self, result: &FileResult) {
        self.total_files += 1;
        self.total_images_found += result.images_found;
        self.total_copied += result.copied;
        self.total_reused += result.reused;
        self.total_skipped_external += result.skipped_external;
        self.total_skipped_missing += result.skipped_missing;
        self.total_name_conflicts += result.name_conflicts;
        self.total_errors += result.errors.len();
    }

    /// Synthetic target failures count as errors but not as processed files.
    pub(crate) fn add_failure(&mut self, result: &FileResult) {
        self.total_errors += result.errors.len().max(1);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub files: Vec<FileResult>,
    pub cancelled: bool,
}

impl RunReport {
    pub(crate) fn record_document(&mut self, result: FileResult) {
        self.summary.add_document(&result);
        self.files.push(result);
    }

    pub(crate) fn record_failure(&mut self, result: FileResult) {
        self.summary.add_failure(&result);
        self.files.push(result);
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileResult> {
        self.files.iter().filter(|file| !file.is_success())
    }

    /// Flat text log: one line per recorded error, then the summary counters.
    pub fn log_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for file in &self.files {
            for error in &file.errors {
                lines.push(format!("{}: {error}", to_posix(&file.file_path)));
            }
        }
        let summary = &self.summary;
        lines.push(format!("total_files: {}", summary.total_files));
        lines.push(format!("total_images_found: {}", summary.total_images_found));
        lines.push(format!("total_copied: {}", summary.total_copied));
        lines.push(format!("total_reused: {}", summary.total_reused));
        lines.push(format!(
            "total_skipped_external: {}",
            summary.total_skipped_external
        ));
        lines.push(format!(
            "total_skipped_missing: {}",
            summary.total_skipped_missing
        ));
        lines.push(format!("total_name_conflicts: {}", summary.total_name_conflicts));
        lines.push(format!("total_errors: {}", summary.total_errors));
        if self.cancelled {
            lines.push("cancelled: yes".to_string());
        }
        lines
    }
}

/// Progress after each completed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Writes `lines` to `path`. Returns `false` without touching the filesystem
/// when there is nothing to write.
pub fn export_log(lines: &[String], path: &Path) -> Result<bool> {
    if lines.is_empty() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, lines.join("\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

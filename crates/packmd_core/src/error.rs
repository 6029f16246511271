use std::path::PathBuf;

use thiserror::Error;

/// Failures recorded while packing. Everything except the validation variants
/// is attached to a [`crate::report::FileResult`] and never aborts the batch.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("failed to back up {}: {message}", path.display())]
    Backup { path: PathBuf, message: String },
    #[error("failed to copy {reference}: {message}")]
    Copy { reference: String, message: String },
    #[error("failed to delete original {}: {message}", path.display())]
    Delete { path: PathBuf, message: String },
    #[error("failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
    #[error("target is missing or inaccessible {}: {message}", path.display())]
    Target { path: PathBuf, message: String },
    #[error("invalid assets directory name `{0}`: use a plain folder name")]
    InvalidAssetsDir(String),
    #[error("invalid naming prefix `{0}`: use letters, digits, CJK, `_`, `-`, `.` or spaces")]
    InvalidPrefix(String),
    #[error(
        "unknown naming mode `{0}` (expected original, sequence, prefix, hash, date, uuid or fixed)"
    )]
    UnknownNamingMode(String),
    #[error("no targets selected")]
    NoTargets,
}

impl PackError {
    pub(crate) fn read(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Read {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub(crate) fn backup(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Backup {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub(crate) fn delete(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Delete {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub(crate) fn target(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Target {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

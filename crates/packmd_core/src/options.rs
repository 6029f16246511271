use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PackError;

pub const DEFAULT_ASSETS_DIR: &str = "assets";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingMode {
    #[default]
    Original,
    Sequence,
    Prefix,
    Hash,
    Date,
    Uuid,
    Fixed,
}

impl NamingMode {
    pub const ALL: [NamingMode; 7] = [
        Self::Original,
        Self::Sequence,
        Self::Prefix,
        Self::Hash,
        Self::Date,
        Self::Uuid,
        Self::Fixed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Sequence => "sequence",
            Self::Prefix => "prefix",
            Self::Hash => "hash",
            Self::Date => "date",
            Self::Uuid => "uuid",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for NamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamingMode {
    type Err = PackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| PackError::UnknownNamingMode(value.trim().to_string()))
    }
}

/// Where the assets directory lives relative to the documents that use it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetsScope {
    /// `<document dir>/<assets_dir_name>`
    #[default]
    PerDocument,
    /// `<target root>/<assets_dir_name>`, shared by every document of the target.
    PerTarget,
}

impl AssetsScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerDocument => "per-document",
            Self::PerTarget => "per-target",
        }
    }
}

impl FromStr for AssetsScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per-document" | "document" => Ok(Self::PerDocument),
            "per-target" | "target" => Ok(Self::PerTarget),
            other => Err(format!(
                "unknown assets scope `{other}` (expected per-document or per-target)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackOptions {
    pub assets_dir_name: String,
    pub naming_mode: NamingMode,
    /// Prefix for `prefix` mode, fixed name for `fixed` mode. Ignored otherwise.
    pub naming_prefix: String,
    pub naming_start: u32,
    pub backup_enabled: bool,
    pub delete_old: bool,
    pub assets_scope: AssetsScope,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            assets_dir_name: DEFAULT_ASSETS_DIR.to_string(),
            naming_mode: NamingMode::Original,
            naming_prefix: String::new(),
            naming_start: 1,
            backup_enabled: false,
            delete_old: false,
            assets_scope: AssetsScope::PerDocument,
        }
    }
}

impl PackOptions {
    /// Rejects anything that could escape the document directory or produce
    /// unusable file names. Runs before any filesystem mutation.
    pub fn validate(&self) -> Result<(), PackError> {
        if !is_valid_assets_dir_name(&self.assets_dir_name) {
            return Err(PackError::InvalidAssetsDir(self.assets_dir_name.clone()));
        }
        if !is_valid_prefix(&self.naming_prefix) {
            return Err(PackError::InvalidPrefix(self.naming_prefix.clone()));
        }
        Ok(())
    }

    pub(crate) fn assets_dir_name(&self) -> &str {
        self.assets_dir_name.trim()
    }

    pub(crate) fn naming_prefix(&self) -> &str {
        self.naming_prefix.trim()
    }
}

pub fn is_valid_assets_dir_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return false;
    }
    !trimmed.chars().any(|ch| {
        matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || ch.is_control()
    })
}

/// An empty prefix is valid; each naming mode has its own fallback.
pub fn is_valid_prefix(prefix: &str) -> bool {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        return true;
    }
    PREFIX
        .get_or_init(|| {
            Regex::new(r"^[\x{4e00}-\x{9fa5}A-Za-z0-9_\-\.\s]+$").expect("invalid prefix regex")
        })
        .is_match(trimmed)
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::options::{AssetsScope, NamingMode, PackOptions};

pub const CONFIG_DIR: &str = ".packmd";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PackConfig {
    #[serde(default)]
    pub pack: PackSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PackSection {
    pub assets_dir: Option<String>,
    pub naming_mode: Option<NamingMode>,
    pub naming_prefix: Option<String>,
    pub backup: Option<bool>,
    pub delete_old: Option<bool>,
    pub assets_scope: Option<AssetsScope>,
}

/// The remembered subset of options. The assets directory and prefix are
/// deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub naming_mode: NamingMode,
    pub backup: bool,
    pub delete_old: bool,
}

impl Preferences {
    pub fn from_options(options: &PackOptions) -> Self {
        Self {
            naming_mode: options.naming_mode,
            backup: options.backup_enabled,
            delete_old: options.delete_old,
        }
    }
}

impl PackConfig {
    /// Options from this config with environment overrides applied:
    /// env > config > default.
    pub fn to_options_with_lookup<F>(&self, lookup_env: F) -> Result<PackOptions>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PackOptions::default();
        let env_value = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let naming_mode = match env_value("PACKMD_NAMING_MODE") {
            Some(value) => value
                .parse::<NamingMode>()
                .context("invalid PACKMD_NAMING_MODE")?,
            None => self.pack.naming_mode.unwrap_or(defaults.naming_mode),
        };

        Ok(PackOptions {
            assets_dir_name: env_value("PACKMD_ASSETS_DIR")
                .or_else(|| self.pack.assets_dir.clone())
                .unwrap_or(defaults.assets_dir_name),
            naming_mode,
            naming_prefix: env_value("PACKMD_NAMING_PREFIX")
                .or_else(|| self.pack.naming_prefix.clone())
                .unwrap_or(defaults.naming_prefix),
            naming_start: defaults.naming_start,
            backup_enabled: self.pack.backup.unwrap_or(defaults.backup_enabled),
            delete_old: self.pack.delete_old.unwrap_or(defaults.delete_old),
            assets_scope: self.pack.assets_scope.unwrap_or(defaults.assets_scope),
        })
    }
}

/// `PACKMD_CONFIG` > `<cwd>/.packmd/config.toml`.
pub fn default_config_path<F>(cwd: &Path, lookup_env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    match lookup_env("PACKMD_CONFIG") {
        Some(value) if !value.trim().is_empty() => {
            let path = PathBuf::from(value.trim());
            if path.is_absolute() { path } else { cwd.join(path) }
        }
        _ => cwd.join(CONFIG_DIR).join(CONFIG_FILENAME),
    }
}

/// Load and parse a PackConfig from a TOML file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PackConfig> {
    if !config_path.exists() {
        return Ok(PackConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PackConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Update the remembered keys under `[pack]` while preserving everything else.
/// Returns `true` when a write occurred.
pub fn save_preferences(config_path: &Path, preferences: &Preferences) -> Result<bool> {
    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let pack_entry = root_table
        .entry("pack".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let pack_table = pack_entry
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[pack] must be a table in {}", config_path.display()))?;

    pack_table.insert(
        "naming_mode".to_string(),
        Value::String(preferences.naming_mode.as_str().to_string()),
    );
    pack_table.insert("backup".to_string(), Value::Boolean(preferences.backup));
    pack_table.insert(
        "delete_old".to_string(),
        Value::Boolean(preferences.delete_old),
    );

    if root == original {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

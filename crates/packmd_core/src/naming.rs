use std::path::Path;

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use crate::options::{NamingMode, PackOptions};

/// Candidate target name for a freshly copied image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub base_name: String,
    /// Source extension including the dot, or empty.
    pub extension: String,
}

impl NameParts {
    /// `base.ext` for attempt 0, `base_N.ext` afterwards.
    pub fn file_name(&self, attempt: usize) -> String {
        if attempt == 0 {
            format!("{}{}", self.base_name, self.extension)
        } else {
            format!("{}_{attempt}{}", self.base_name, self.extension)
        }
    }
}

/// Monotonic per-assets-directory counter used by the numbered modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCounter {
    next: u32,
}

impl NameCounter {
    pub fn new(start: u32) -> Self {
        Self { next: start }
    }

    pub fn take(&mut self) -> u32 {
        let value = self.next;
        self.next = self.next.saturating_add(1);
        value
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePolicy {
    mode: NamingMode,
    prefix: String,
}

impl NamePolicy {
    pub fn new(mode: NamingMode, prefix: impl Into<String>) -> Self {
        Self {
            mode,
            prefix: prefix.into(),
        }
    }

    pub fn from_options(options: &PackOptions) -> Self {
        Self::new(options.naming_mode, options.naming_prefix())
    }

    /// `digest` is the source content digest, already computed by the copier.
    pub fn name_for(&self, source: &Path, digest: &str, counter: &mut NameCounter) -> NameParts {
        self.name_at(source, digest, counter, Local::now().naive_local())
    }

    fn name_at(
        &self,
        source: &Path,
        digest: &str,
        counter: &mut NameCounter,
        now: NaiveDateTime,
    ) -> NameParts {
        let extension = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let source_base = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let base_name = match self.mode {
            NamingMode::Original => source_base,
            NamingMode::Sequence => format!("img-{}", counter.take()),
            NamingMode::Prefix => {
                let prefix = if self.prefix.is_empty() {
                    "img"
                } else {
                    self.prefix.as_str()
                };
                format!("{prefix}{}", counter.take())
            }
            NamingMode::Hash => digest.to_string(),
            NamingMode::Date => {
                format!("img_{}_{}", now.format("%Y%m%d_%H%M%S"), counter.take())
            }
            NamingMode::Uuid => Uuid::new_v4().to_string(),
            NamingMode::Fixed => {
                if !self.prefix.is_empty() {
                    self.prefix.clone()
                } else if !source_base.is_empty() {
                    source_base
                } else {
                    "image".to_string()
                }
            }
        };

        NameParts {
            base_name,
            extension,
        }
    }
}

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::digest::digest_file;
use crate::naming::{NameCounter, NamePolicy};
use crate::resolve::{normalize_path, relative_path, to_posix};

/// A materialized target for one content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub absolute: PathBuf,
}

/// Digest to target mapping for a single assets directory. In-memory only and
/// seeded empty each run.
#[derive(Debug, Default)]
pub struct DedupStore {
    by_digest: HashMap<String, DedupEntry>,
}

impl DedupStore {
    pub fn get(&self, digest: &str) -> Option<&DedupEntry> {
        self.by_digest.get(digest)
    }

    pub fn insert(&mut self, digest: String, entry: DedupEntry) {
        self.by_digest.insert(digest, entry);
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

/// Mutable state owned by one assets directory for the duration of a target.
#[derive(Debug)]
pub struct AssetSlot {
    pub store: DedupStore,
    pub counter: NameCounter,
}

/// Per-target registry of [`AssetSlot`]s keyed by normalized assets directory.
#[derive(Debug)]
pub struct AssetContexts {
    naming_start: u32,
    slots: HashMap<PathBuf, AssetSlot>,
}

impl AssetContexts {
    pub fn new(naming_start: u32) -> Self {
        Self {
            naming_start,
            slots: HashMap::new(),
        }
    }

    pub fn slot_mut(&mut self, assets_dir: &Path) -> &mut AssetSlot {
        let start = self.naming_start;
        self.slots
            .entry(normalize_path(assets_dir))
            .or_insert_with(|| AssetSlot {
                store: DedupStore::default(),
                counter: NameCounter::new(start),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Path to write into the document, relative to `document_dir`.
    pub target_relative: String,
    pub target_absolute: PathBuf,
    pub reused: bool,
    pub name_conflicts: usize,
}

/// Copies `source` into `assets_dir`, reusing any target with identical
/// content and never overwriting a file whose content differs.
pub fn copy_with_dedup(
    source: &Path,
    assets_dir: &Path,
    document_dir: &Path,
    slot: &mut AssetSlot,
    policy: &NamePolicy,
) -> Result<CopyOutcome> {
    let metadata = fs::metadata(source)
        .with_context(|| format!("image file does not exist: {}", source.display()))?;
    if !metadata.is_file() {
        bail!("image is not a regular file: {}", source.display());
    }

    let digest = digest_file(source)?;
    if let Some(entry) = slot.store.get(&digest) {
        debug!(
            source = %source.display(),
            target = %entry.absolute.display(),
            "digest already materialized"
        );
        return Ok(CopyOutcome {
            target_relative: relative_to_document(document_dir, assets_dir, &entry.absolute),
            target_absolute: entry.absolute.clone(),
            reused: true,
            name_conflicts: 0,
        });
    }

    fs::create_dir_all(assets_dir)
        .with_context(|| format!("failed to create {}", assets_dir.display()))?;

    let parts = policy.name_for(source, &digest, &mut slot.counter);
    let mut attempt = 0usize;
    loop {
        let target = assets_dir.join(parts.file_name(attempt));
        match create_new_copy(source, &target) {
            Ok(()) => {
                let relative = relative_to_document(document_dir, assets_dir, &target);
                debug!(source = %source.display(), target = %target.display(), "copied image");
                slot.store.insert(
                    digest,
                    DedupEntry {
                        absolute: target.clone(),
                    },
                );
                return Ok(CopyOutcome {
                    target_relative: relative,
                    target_absolute: target,
                    reused: false,
                    name_conflicts: attempt,
                });
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                if target.is_file() && digest_file(&target)? == digest {
                    let relative = relative_to_document(document_dir, assets_dir, &target);
                    debug!(target = %target.display(), "identical file already present");
                    slot.store.insert(
                        digest,
                        DedupEntry {
                            absolute: target.clone(),
                        },
                    );
                    return Ok(CopyOutcome {
                        target_relative: relative,
                        target_absolute: target,
                        reused: true,
                        name_conflicts: attempt,
                    });
                }
                attempt += 1;
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!(
                        "failed to copy {} to {}",
                        source.display(),
                        target.display()
                    )
                });
            }
        }
    }
}

// `create_new` refuses to clobber a file that appeared after the name was chosen.
fn create_new_copy(source: &Path, target: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)?;
    if let Err(error) = io::copy(&mut input, &mut output) {
        drop(output);
        let _ = fs::remove_file(target);
        return Err(error);
    }
    Ok(())
}

fn relative_to_document(document_dir: &Path, assets_dir: &Path, target: &Path) -> String {
    if normalize_path(assets_dir) == normalize_path(document_dir) {
        return target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    to_posix(&relative_path(document_dir, target))
}

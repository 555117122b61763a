//! Repair of per-repository `_index_images` files.
//!
//! An index lists the images a repository has ever referenced, independently of its tags.
//! After a sweep, entries naming quarantined images are stale and get dropped.  The original
//! file is always saved to the quarantine area before the live one is replaced.

use std::{
    fs::{read, remove_file, rename, set_permissions, File, Permissions},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::GcConfig,
    error::RepairError,
    layout::{Layout, INDEX_FILE},
    quarantine::Quarantine,
    set::IdSet,
    util::NotFoundFilter,
    ImageId,
};

/// One record of an index.  Fields besides `id` (such as `checksum`) are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default, alias = "Id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ImageId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IndexEntry {
    pub fn new(id: impl Into<ImageId>) -> Self {
        Self {
            id: Some(id.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// A decoded `_index_images` file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFile {
    pub path: PathBuf,
    pub entries: Vec<IndexEntry>,
    /// Permission bits of the file as found.
    pub mode: u32,
}

impl IndexFile {
    /// Reads the index of `repository`.
    ///
    /// A missing index is `Ok(None)`.  Unreadable or malformed ones are errors, which callers
    /// treat as "nothing to repair".
    pub fn read(registry: &Layout, repository: &str) -> Result<Option<Self>> {
        let path = registry.index_file(repository);
        let Some(data) = read(&path)
            .filter_not_found()
            .with_context(|| format!("Reading {}", path.display()))?
        else {
            return Ok(None);
        };
        let mode = path
            .metadata()
            .with_context(|| format!("Reading metadata of {}", path.display()))?
            .permissions()
            .mode()
            & 0o7777;
        let entries = serde_json::from_slice(&data)
            .with_context(|| format!("Decoding {}", path.display()))?;
        Ok(Some(Self {
            path,
            entries,
            mode,
        }))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.entries)?)
    }

    /// Replaces the file on disk with the current entries, keeping its permission bits.
    ///
    /// The new content is written next to the original and renamed over it, so a crash leaves
    /// either the old or the new index, never a truncated one.  On failure the temporary file
    /// is removed again.
    pub fn write(&self) -> Result<()> {
        let data = self.encode()?;
        let tmp = self.path.with_file_name(format!(".{INDEX_FILE}.tmp"));

        let result = write_tmp(&tmp, &data, self.mode).and_then(|()| {
            rename(&tmp, &self.path)
                .with_context(|| format!("Renaming {} to {}", tmp.display(), self.path.display()))
        });
        if result.is_err() {
            if let Err(e) = remove_file(&tmp).filter_not_found() {
                debug!("Leaving {} behind: {e}", tmp.display());
            }
        }
        result
    }
}

fn write_tmp(tmp: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = File::create(tmp).with_context(|| format!("Creating {}", tmp.display()))?;
    set_permissions(tmp, Permissions::from_mode(mode))?;
    file.write_all(data)?;
    file.sync_data()?;
    Ok(())
}

/// Drops every entry whose id is in `removed`, returning how many went.
///
/// Duplicate entries for the same image are all dropped.  Entries without an id are kept.
pub fn remove_entries(entries: &mut Vec<IndexEntry>, removed: &IdSet) -> usize {
    let before = entries.len();
    entries.retain(|entry| match &entry.id {
        Some(id) if !id.is_empty() => !removed.contains(id),
        _ => true,
    });
    before - entries.len()
}

/// How one repository's index ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    /// No `_index_images` file, or one that couldn't be decoded.
    Absent,
    /// Nothing in the index referenced a removed image.
    Unchanged,
    /// Entries were dropped (or, dry, would have been) after backing the original up.
    Rewritten { removed: usize, backup: PathBuf },
}

/// Removes the entries for `removed` images from the index of `repository`.
///
/// Read, then if anything matches: back up, then write.  Backup failure leaves the live index
/// untouched.  Nothing is retried.
pub fn update_index(
    config: &GcConfig,
    quarantine: &Quarantine,
    repository: &str,
    removed: &IdSet,
) -> Result<IndexUpdate, RepairError> {
    let registry = Layout::new(&config.registry_path);
    let mut index = match IndexFile::read(&registry, repository) {
        Ok(Some(index)) => index,
        Ok(None) => {
            debug!("{repository} has no index");
            return Ok(IndexUpdate::Absent);
        }
        Err(e) => {
            warn!("Skipping index of {repository}: {e:#}");
            return Ok(IndexUpdate::Absent);
        }
    };

    let count = remove_entries(&mut index.entries, removed);
    if count == 0 {
        return Ok(IndexUpdate::Unchanged);
    }
    debug!("dropping {count} entries from index of {repository}");

    let backup = quarantine
        .backup_index(repository, &index.path)
        .map_err(RepairError::Backup)?;

    if config.dry_run {
        notice!(config, "Skipping write of new {INDEX_FILE} for {repository}");
    } else {
        index
            .write()
            .with_context(|| format!("Writing index of {repository}"))
            .map_err(RepairError::Write)?;
        notice!(config, "Rewrote {INDEX_FILE} for {repository}, {count} entries removed");
    }

    Ok(IndexUpdate::Rewritten {
        removed: count,
        backup,
    })
}

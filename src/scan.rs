//! Inventory of what the registry holds.
//!
//! Scanning is best effort: an unreadable directory or tag file is logged and treated as
//! absent, so one damaged repository can't stop the rest of the registry from being collected.

use std::{
    fs::{read_dir, read_to_string, DirEntry},
    io,
    path::Path,
};

use log::{debug, warn};

use crate::{
    layout::{is_valid_image_id, Layout, TAG_PREFIX},
    util::NotFoundFilter,
    ImageId, RepositoryName,
};

/// Lists the names of `dir`'s children, in directory order.
///
/// A missing directory is empty.  With `dirs_only`, non-directory entries are skipped.
fn list_dir(dir: &Path, dirs_only: bool) -> Vec<String> {
    let entries = match read_dir(dir).filter_not_found() {
        Ok(Some(entries)) => entries,
        Ok(None) => {
            debug!("{} does not exist", dir.display());
            return Vec::new();
        }
        Err(e) => {
            warn!("Cannot list {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let is_wanted = |entry: &DirEntry| -> io::Result<bool> {
        Ok(!dirs_only || entry.file_type()?.is_dir())
    };

    let mut names = Vec::new();
    for item in entries {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read entry in {}: {e}", dir.display());
                continue;
            }
        };
        match is_wanted(&entry) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Cannot stat {}: {e}", entry.path().display());
                continue;
            }
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("Skipping non-UTF-8 name {name:?} in {}", dir.display()),
        }
    }
    names
}

/// Every image ID in storage: one per directory below `images/`.
pub fn list_all_image_ids(registry: &Layout) -> Vec<ImageId> {
    list_dir(&registry.images_dir(), true)
}

/// Every repository as `namespace/name`, in discovery order.
pub fn list_all_repositories(registry: &Layout) -> Vec<RepositoryName> {
    let root = registry.repositories_dir();
    list_dir(&root, true)
        .into_iter()
        .flat_map(|namespace| {
            list_dir(&root.join(&namespace), true)
                .into_iter()
                .map(move |name| format!("{namespace}/{name}"))
        })
        .collect()
}

/// Reads one tag file, returning the image ID it points to.
///
/// Returns `None` (after logging) for anything that isn't a usable ID.
pub fn read_tag(path: &Path) -> Option<ImageId> {
    let content = match read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Skipping unreadable tag {}: {e}", path.display());
            return None;
        }
    };
    let id = content.trim();
    if !is_valid_image_id(id) {
        warn!("Skipping tag {} with invalid target {id:?}", path.display());
        return None;
    }
    Some(id.to_owned())
}

/// The images pointed to by the tags of each of `repositories`, duplicates included.
pub fn list_used_image_targets(registry: &Layout, repositories: &[RepositoryName]) -> Vec<ImageId> {
    let mut targets = Vec::new();
    for repository in repositories {
        let dir = registry.repository_dir(repository);
        for name in list_dir(&dir, false) {
            if !name.starts_with(TAG_PREFIX) {
                continue;
            }
            if let Some(id) = read_tag(&dir.join(&name)) {
                debug!("{repository}:{} -> {id}", &name[TAG_PREFIX.len()..]);
                targets.push(id);
            }
        }
    }
    targets
}

//! Marking: which images are still needed.

use std::fs::read;

use log::{debug, trace, warn};

use crate::{layout::Layout, set::IdSet, util::NotFoundFilter, ImageId};

/// Reads the ancestry of `id`: the image itself followed by its parents, most derived first.
///
/// A missing or malformed ancestry file yields an empty chain.
pub fn compute_ancestry(registry: &Layout, id: &str) -> Vec<ImageId> {
    let path = registry.ancestry_file(id);
    let data = match read(&path).filter_not_found() {
        Ok(Some(data)) => data,
        Ok(None) => {
            debug!("{id} has no ancestry file");
            return Vec::new();
        }
        Err(e) => {
            warn!("Cannot read ancestry of {id}: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&data) {
        Ok(ancestry) => ancestry,
        Err(e) => {
            warn!("Ignoring malformed ancestry of {id}: {e}");
            Vec::new()
        }
    }
}

/// Builds the set of images reachable from `targets` (the images tags point at).
///
/// Each target is reachable itself, whatever its ancestry file says, and so is every image
/// in its ancestry chain.  Chains are write-once and end at a root layer, so there is no
/// cycle to guard against.
pub fn compute_reachable(registry: &Layout, targets: &[ImageId]) -> IdSet {
    let mut reachable = IdSet::new();
    for target in targets {
        if !reachable.add(target.as_str()) {
            trace!("{target} already reachable");
        }
        let ancestry = compute_ancestry(registry, target);
        match ancestry.first() {
            Some(first) if first != target => {
                warn!("Ancestry of {target} starts with {first}");
            }
            _ => {}
        }
        debug!("{target} lives, with {} ancestors", ancestry.len());
        reachable.extend(ancestry);
    }
    reachable
}

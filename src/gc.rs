//! A complete collection run: scan, mark, sweep, repair.

use std::fmt;

use anyhow::Result;
use fn_error_context::context;
use log::{debug, error, info};

use crate::{
    config::GcConfig,
    error::RepairError,
    index::{update_index, IndexUpdate},
    layout::Layout,
    quarantine::{find_unreferenced, sweep, Quarantine},
    reachability::compute_reachable,
    scan::{list_all_image_ids, list_all_repositories, list_used_image_targets},
    set::IdSet,
    ImageId, RepositoryName,
};

/// The step at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Copying an image to the quarantine area; the image was left live.
    Copy,
    /// Removing a live image after it was copied; the image now exists twice.
    Remove,
    /// Backing up an index; the live index was left untouched.
    Backup,
    /// Replacing an index after its backup was taken.
    Write,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Copy => "copy",
            FailureKind::Remove => "remove",
            FailureKind::Backup => "backup",
            FailureKind::Write => "write",
        })
    }
}

/// A per-item failure that did not stop the run.  Re-running the collector retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Image ID or repository name.
    pub subject: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(subject: impl Into<String>, kind: FailureKind, error: &anyhow::Error) -> Self {
        Self {
            subject: subject.into(),
            kind,
            message: format!("{error:#}"),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}: {}", self.kind, self.subject, self.message)
    }
}

/// Statistics from a collection run.
///
/// In dry-run mode the figures describe what would have happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcResult {
    pub images_scanned: u64,
    pub repositories: Vec<RepositoryName>,
    /// Number of distinct images reachable from some tag.
    pub reachable: u64,
    /// Images not reachable from any tag, in inventory order.
    pub unreferenced: Vec<ImageId>,
    /// Unreferenced images copied to the quarantine area.
    pub quarantined: Vec<ImageId>,
    /// Live image directories deleted.
    pub removed: u64,
    /// Bytes of image data copied to the quarantine area.
    pub bytes_quarantined: u64,
    pub indexes_rewritten: u64,
    pub index_entries_removed: u64,
    pub failures: Vec<Failure>,
}

impl GcResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs a full collection of the registry described by `config`.
///
/// The only error returned is failure to prepare the quarantine area, which happens before
/// anything is read or changed.  Everything else is reported in [`GcResult::failures`].
#[context("Collecting garbage in {}", config.registry_path.display())]
pub fn collect(config: &GcConfig) -> Result<GcResult> {
    let quarantine = Quarantine::open(config)?;
    let registry = Layout::new(&config.registry_path);
    let mut result = GcResult::default();

    let inventory = list_all_image_ids(&registry);
    result.images_scanned = inventory.len() as u64;
    result.repositories = list_all_repositories(&registry);
    debug!(
        "{} images, {} repositories",
        inventory.len(),
        result.repositories.len()
    );

    let targets = list_used_image_targets(&registry, &result.repositories);
    let reachable = compute_reachable(&registry, &targets);
    result.reachable = reachable.len() as u64;

    result.unreferenced = find_unreferenced(&inventory, &reachable);
    for id in &result.unreferenced {
        info!("Unused image: {id}");
    }

    let swept = sweep(&quarantine, &result.unreferenced);
    let mut removed = swept.quarantined_set();
    let live: IdSet = inventory.iter().collect();
    let earlier = quarantine.images_not_in(&live);
    if !earlier.is_empty() {
        debug!("{} images quarantined by earlier runs", earlier.len());
    }
    removed.extend(earlier);
    result.removed = swept.removed;
    result.bytes_quarantined = swept.bytes;
    result.failures.extend(swept.failures);
    result.quarantined = swept.quarantined;

    if !removed.is_empty() {
        for repository in &result.repositories {
            match update_index(config, &quarantine, repository, &removed) {
                Ok(IndexUpdate::Rewritten { removed, .. }) => {
                    result.indexes_rewritten += 1;
                    result.index_entries_removed += removed as u64;
                }
                Ok(IndexUpdate::Unchanged | IndexUpdate::Absent) => {}
                Err(e) => {
                    error!("Failed to update index of {repository}: {e}");
                    let (kind, e) = match e {
                        RepairError::Backup(e) => (FailureKind::Backup, e),
                        RepairError::Write(e) => (FailureKind::Write, e),
                    };
                    result.failures.push(Failure::new(repository, kind, &e));
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::TestRegistry;

    #[test]
    fn test_collect_empty_registry() -> Result<()> {
        let reg = TestRegistry::new();
        let result = collect(&reg.config)?;
        assert_eq!(result, GcResult::default());
        assert!(reg.quarantine().images_dir().is_dir());
        Ok(())
    }

    #[test]
    fn test_collect_simple_chain() -> Result<()> {
        let reg = TestRegistry::new();
        reg.chain(&["x3", "x2", "x1"]);
        reg.image("x4", Some(&["x4"]));
        reg.tag("library/r", "latest", "x3");
        reg.index("library/r", &["x1", "x2", "x3", "x4"]);

        let result = collect(&reg.config)?;
        assert_eq!(result.images_scanned, 4);
        assert_eq!(result.reachable, 3);
        assert_eq!(result.unreferenced, vec!["x4"]);
        assert_eq!(result.quarantined, vec!["x4"]);
        assert_eq!(result.removed, 1);
        assert_eq!(result.indexes_rewritten, 1);
        assert_eq!(result.index_entries_removed, 1);
        assert!(result.is_clean());

        for id in ["x1", "x2", "x3"] {
            assert!(reg.image_exists(id));
            assert!(!reg.quarantined(id));
        }
        assert!(!reg.image_exists("x4"));
        assert!(reg.quarantined("x4"));
        Ok(())
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(
            "library/r",
            FailureKind::Backup,
            &anyhow::anyhow!("disk full"),
        );
        assert_eq!(
            failure.to_string(),
            "backup failed for library/r: disk full"
        );
    }
}

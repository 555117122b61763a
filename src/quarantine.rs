//! The quarantine area and the sweep that fills it.
//!
//! Nothing leaves the registry without first being copied here.  An image is copied to
//! `<delete>/images/<id>` before its live directory is removed, and an index is copied to
//! `<delete>/repositories/<namespace>/<name>/_index_images` before it is rewritten.  If a run
//! is interrupted, the worst case is an image present in both trees, which the next run
//! resolves by copying over it again and removing the original, or an index still naming an
//! image that was already moved, which the next run drops.

use std::{
    fs::{remove_dir_all, DirBuilder},
    io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fn_error_context::context;
use log::{debug, error, trace};
use rustix::{
    fs::{statat, AtFlags, FileType, CWD},
    io::Errno,
};

use crate::{
    config::GcConfig,
    error::SetupError,
    gc::{Failure, FailureKind},
    layout::{Layout, INDEX_FILE},
    scan::list_all_image_ids,
    set::IdSet,
    util::{copy_file, copy_tree, tree_size, ErrnoFilter},
    ImageId,
};

/// Checks that `path` is a directory, or absent.
fn check_dir(path: &Path) -> Result<bool, SetupError> {
    match statat(CWD, path, AtFlags::empty()).filter_errno(Errno::NOENT) {
        Ok(Some(stat)) if FileType::from_raw_mode(stat.st_mode) == FileType::Directory => {
            Ok(true)
        }
        Ok(Some(_)) => Err(SetupError::NotADirectory(path.to_path_buf())),
        Ok(None) => Ok(false),
        Err(errno) => Err(SetupError::Stat {
            path: path.to_path_buf(),
            source: errno.into(),
        }),
    }
}

fn create_dirs(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o755).create(path)
}

fn remove_image_dir(path: &Path) -> io::Result<()> {
    remove_dir_all(path)
}

/// What happened to the live copy of an image once its quarantine copy was in place.
#[derive(Debug)]
pub enum Removal {
    Removed,
    /// Dry run: the live directory was left alone.
    Skipped,
    /// The copy exists but the original could not be removed.  Harmless; a re-run retries.
    Failed(anyhow::Error),
}

/// An image that made it into (or, dry, would make it into) the quarantine area.
#[derive(Debug)]
pub struct Quarantined {
    /// Bytes of regular file data copied (or that would be copied).
    pub bytes: u64,
    pub removal: Removal,
}

/// Handle on a prepared quarantine area.
#[derive(Debug)]
pub struct Quarantine<'a> {
    config: &'a GcConfig,
    remove: fn(&Path) -> io::Result<()>,
}

impl<'a> Quarantine<'a> {
    /// Prepares `<delete>/images`, creating it if needed.
    ///
    /// Failure here is the only thing that stops a run.  In dry-run mode nothing is created; a
    /// missing area is only reported.
    pub fn open(config: &'a GcConfig) -> Result<Self, SetupError> {
        let images = Layout::new(&config.delete_path).images_dir();

        check_dir(&config.delete_path)?;
        if !check_dir(&images)? {
            if config.dry_run {
                notice!(config, "Would create {}", images.display());
            } else {
                create_dirs(&images).map_err(|source| SetupError::Create {
                    path: images.clone(),
                    source,
                })?;
                log::info!("Created {}", config.delete_path.display());
            }
        }

        Ok(Self {
            config,
            remove: remove_image_dir,
        })
    }

    #[cfg(test)]
    fn with_remover(self, remove: fn(&Path) -> io::Result<()>) -> Self {
        Self { remove, ..self }
    }

    pub fn layout(&self) -> Layout<'a> {
        Layout::new(&self.config.delete_path)
    }

    fn registry(&self) -> Layout<'a> {
        Layout::new(&self.config.registry_path)
    }

    /// Moves one image out of the registry: copy it in full, then remove the original.
    ///
    /// A failed copy is an error and leaves the live image untouched.  A failed removal is not;
    /// it is reported through [`Removal::Failed`].
    #[context("Quarantining image {id}")]
    pub fn quarantine_image(&self, id: &str) -> Result<Quarantined> {
        let src = self.registry().image_dir(id);
        let dst = self.layout().image_dir(id);

        if self.config.dry_run {
            let bytes = tree_size(&src)?;
            notice!(
                self.config,
                "Would copy {} to {} ({bytes} bytes)",
                src.display(),
                dst.display()
            );
            notice!(self.config, "Skipping removal of {}", src.display());
            return Ok(Quarantined {
                bytes,
                removal: Removal::Skipped,
            });
        }

        let bytes = copy_tree(&src, &dst)?;
        debug!("copied {} to {} ({bytes} bytes)", src.display(), dst.display());

        let removal = match (self.remove)(&src) {
            Ok(()) => {
                notice!(self.config, "Removed {}", src.display());
                Removal::Removed
            }
            Err(e) => Removal::Failed(
                anyhow::Error::new(e).context(format!("Removing {}", src.display())),
            ),
        };
        Ok(Quarantined { bytes, removal })
    }

    /// Saves the unmodified `_index_images` of `repository` into the quarantine area,
    /// returning where the backup lives.
    #[context("Backing up index of {repository}")]
    pub fn backup_index(&self, repository: &str, index: &Path) -> Result<PathBuf> {
        let dir = self.layout().repository_dir(repository);
        let backup = dir.join(INDEX_FILE);

        if self.config.dry_run {
            notice!(
                self.config,
                "Would back up {} to {}",
                index.display(),
                backup.display()
            );
            return Ok(backup);
        }

        create_dirs(&dir).with_context(|| format!("Creating {}", dir.display()))?;
        copy_file(index, &backup)?;
        debug!("backed up {} to {}", index.display(), backup.display());
        Ok(backup)
    }

    /// Images held in the quarantine area that are no longer `live` in the registry.
    ///
    /// These were moved by earlier runs.  If such a run failed or was interrupted before
    /// repairing an index, the index may still name them.
    pub fn images_not_in(&self, live: &IdSet) -> Vec<ImageId> {
        list_all_image_ids(&self.layout())
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect()
    }
}

/// Images present in `inventory` but never reached, in inventory order.
pub fn find_unreferenced(inventory: &[ImageId], reachable: &IdSet) -> Vec<ImageId> {
    inventory
        .iter()
        .filter(|id| !reachable.contains(id))
        .cloned()
        .collect()
}

/// Outcome of sweeping every unreferenced image.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Images now (or, dry, that would be) in the quarantine area.
    pub quarantined: Vec<ImageId>,
    /// Live image directories actually deleted.
    pub removed: u64,
    pub bytes: u64,
    pub failures: Vec<Failure>,
}

impl Sweep {
    /// The quarantined images as a set, for index repair.
    pub fn quarantined_set(&self) -> IdSet {
        self.quarantined.iter().cloned().collect()
    }
}

/// Quarantines each of `unreferenced` in turn.  One image failing never stops the others.
pub fn sweep(quarantine: &Quarantine, unreferenced: &[ImageId]) -> Sweep {
    let mut result = Sweep::default();
    for id in unreferenced {
        match quarantine.quarantine_image(id) {
            Ok(Quarantined { bytes, removal }) => {
                result.quarantined.push(id.clone());
                result.bytes += bytes;
                match removal {
                    Removal::Removed => result.removed += 1,
                    Removal::Skipped => trace!("{id} left in place"),
                    Removal::Failed(e) => {
                        error!("Failed to remove {id}: {e:#}");
                        result.failures.push(Failure::new(id, FailureKind::Remove, &e));
                    }
                }
            }
            Err(e) => {
                error!("Failed to move {id}: {e:#}");
                result.failures.push(Failure::new(id, FailureKind::Copy, &e));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{self, write},
        os::unix::fs::PermissionsExt,
    };

    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::TestRegistry;

    #[test]
    fn test_open_creates_area() -> Result<()> {
        let reg = TestRegistry::new();
        let quarantine = Quarantine::open(&reg.config)?;
        let images = quarantine.layout().images_dir();
        assert!(images.is_dir());

        // already there is fine
        Quarantine::open(&reg.config)?;
        Ok(())
    }

    #[test]
    fn test_open_rejects_file() {
        let reg = TestRegistry::new();
        write(&reg.config.delete_path, "").unwrap();
        let err = Quarantine::open(&reg.config).unwrap_err();
        assert!(matches!(err, SetupError::NotADirectory(ref p) if *p == reg.config.delete_path));
    }

    #[test]
    fn test_open_rejects_images_file() {
        let reg = TestRegistry::new();
        fs::create_dir(&reg.config.delete_path).unwrap();
        write(reg.config.delete_path.join("images"), "").unwrap();
        assert!(matches!(
            Quarantine::open(&reg.config),
            Err(SetupError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_open_dry_run_creates_nothing() -> Result<()> {
        let reg = TestRegistry::new();
        let config = reg.config.clone().with_dry_run(true);
        Quarantine::open(&config)?;
        assert!(!config.delete_path.exists());
        Ok(())
    }

    #[test]
    fn test_find_unreferenced() {
        let inventory: Vec<_> = ["x1", "x2", "x3", "x4"].map(String::from).into();
        let reachable: IdSet = ["x3", "x1", "elsewhere"].into_iter().collect();
        assert_eq!(find_unreferenced(&inventory, &reachable), vec!["x2", "x4"]);
        assert!(find_unreferenced(&[], &reachable).is_empty());
    }

    #[test]
    fn test_quarantine_image() -> Result<()> {
        let reg = TestRegistry::new();
        reg.image("x4", Some(&["x4"]));
        let quarantine = Quarantine::open(&reg.config)?;

        let result = quarantine.quarantine_image("x4")?;
        assert!(matches!(result.removal, Removal::Removed));
        assert!(result.bytes > 0);
        assert!(!reg.image_exists("x4"));
        assert!(reg.quarantined("x4"));
        assert_eq!(
            fs::read_to_string(quarantine.layout().image_dir("x4").join("layer"))?,
            "payload of x4"
        );
        Ok(())
    }

    #[test]
    fn test_quarantine_missing_image_fails() -> Result<()> {
        let reg = TestRegistry::new();
        let quarantine = Quarantine::open(&reg.config)?;
        let err = quarantine.quarantine_image("ghost").unwrap_err();
        assert!(format!("{err:#}").contains("ghost"));
        assert!(!reg.quarantined("ghost"));
        Ok(())
    }

    #[test]
    fn test_quarantine_dry_run() -> Result<()> {
        let reg = TestRegistry::new();
        let path = reg.image("x4", Some(&["x4"]));
        let config = reg.config.clone().with_dry_run(true);
        let quarantine = Quarantine::open(&config)?;

        let result = quarantine.quarantine_image("x4")?;
        assert!(matches!(result.removal, Removal::Skipped));
        assert_eq!(result.bytes, crate::util::tree_size(&path)?);
        assert!(reg.image_exists("x4"));
        assert!(!config.delete_path.exists());
        Ok(())
    }

    #[test]
    fn test_requarantine_overwrites() -> Result<()> {
        let reg = TestRegistry::new();
        let quarantine = Quarantine::open(&reg.config)?;
        // an earlier interrupted run left a stale partial copy behind
        let stale = quarantine.layout().image_dir("x4");
        fs::create_dir_all(&stale)?;
        write(stale.join("layer"), "partial")?;

        reg.image("x4", Some(&["x4"]));
        quarantine.quarantine_image("x4")?;
        assert_eq!(fs::read_to_string(stale.join("layer"))?, "payload of x4");
        assert!(!reg.image_exists("x4"));
        Ok(())
    }

    #[test]
    fn test_sweep_continues_past_failures() -> Result<()> {
        let reg = TestRegistry::new();
        reg.image("a", None);
        reg.image("c", None);
        let quarantine = Quarantine::open(&reg.config)?;

        let ids: Vec<_> = ["a", "ghost", "c"].map(String::from).into();
        let result = sweep(&quarantine, &ids);
        assert_eq!(result.quarantined, vec!["a", "c"]);
        assert_eq!(result.removed, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].subject, "ghost");
        assert_eq!(result.failures[0].kind, FailureKind::Copy);
        Ok(())
    }

    #[test]
    fn test_sweep_removal_failure() -> Result<()> {
        let reg = TestRegistry::new();
        reg.image("a", Some(&["a"]));
        reg.image("b", Some(&["b"]));
        let ids: Vec<_> = ["a", "b"].map(String::from).into();

        let busy = Quarantine::open(&reg.config)?.with_remover(|path| {
            if path.ends_with("a") {
                Err(io::Error::other("device or resource busy"))
            } else {
                remove_dir_all(path)
            }
        });
        let result = sweep(&busy, &ids);
        assert_eq!(result.quarantined, vec!["a", "b"]);
        assert_eq!(result.removed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].subject, "a");
        assert_eq!(result.failures[0].kind, FailureKind::Remove);
        assert!(result.failures[0].message.contains("busy"));

        // left in both trees until a later run
        assert!(reg.image_exists("a") && reg.quarantined("a"));
        assert!(!reg.image_exists("b") && reg.quarantined("b"));

        let again = sweep(&Quarantine::open(&reg.config)?, &ids[..1]);
        assert_eq!(again.removed, 1);
        assert!(again.failures.is_empty());
        assert!(!reg.image_exists("a"));
        assert_eq!(
            fs::read_to_string(reg.quarantine().image_dir("a").join("layer"))?,
            "payload of a"
        );
        Ok(())
    }

    #[test]
    fn test_images_not_in() -> Result<()> {
        let reg = TestRegistry::new();
        let quarantine = Quarantine::open(&reg.config)?;
        for id in ["old", "both"] {
            fs::create_dir(quarantine.layout().image_dir(id))?;
        }
        write(quarantine.layout().image_dir("stray"), "")?;

        let live: IdSet = ["both", "other"].into_iter().collect();
        assert_eq!(quarantine.images_not_in(&live), vec!["old"]);

        // no quarantine area yet
        let fresh = TestRegistry::new();
        let dry = fresh.config.clone().with_dry_run(true);
        assert!(Quarantine::open(&dry)?.images_not_in(&live).is_empty());
        Ok(())
    }

    #[test]
    fn test_backup_index() -> Result<()> {
        let reg = TestRegistry::new();
        let index = reg.index("library/ubuntu", &["a", "b"]);
        fs::set_permissions(&index, fs::Permissions::from_mode(0o600))?;
        let quarantine = Quarantine::open(&reg.config)?;

        let backup = quarantine.backup_index("library/ubuntu", &index)?;
        assert_eq!(
            backup,
            reg.config
                .delete_path
                .join("repositories/library/ubuntu/_index_images")
        );
        assert_eq!(fs::read(&backup)?, fs::read(&index)?);
        assert_eq!(fs::metadata(&backup)?.permissions().mode() & 0o777, 0o600);
        Ok(())
    }
}

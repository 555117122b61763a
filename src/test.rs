//! Fixture registries for tests.
//!
//! Available to other crates' tests with the `test` feature.

use std::{
    ffi::OsString,
    fs::{create_dir_all, write},
    path::PathBuf,
};

use once_cell::sync::Lazy;
use tempfile::TempDir;

use crate::{config::GcConfig, layout::Layout};

static TMPDIR: Lazy<OsString> = Lazy::new(|| {
    if let Some(path) = std::env::var_os("REGISTRY_GC_TEST_TMPDIR") {
        eprintln!("temporary directory from $REGISTRY_GC_TEST_TMPDIR: {path:?}");
        path
    } else {
        std::env::temp_dir().into()
    }
});

pub fn tempdir() -> TempDir {
    TempDir::with_prefix_in("registry-gc-test-", TMPDIR.as_os_str()).unwrap()
}

/// A registry and an (initially absent) quarantine area in one temporary directory.
#[derive(Debug)]
pub struct TestRegistry {
    pub config: GcConfig,
    _tempdir: TempDir,
}

impl TestRegistry {
    pub fn new() -> Self {
        let dir = tempdir();
        let config = GcConfig::new(dir.path().join("registry"), dir.path().join("delete"));
        create_dir_all(config.registry_path.join("images")).unwrap();
        create_dir_all(config.registry_path.join("repositories")).unwrap();
        Self {
            config,
            _tempdir: dir,
        }
    }

    /// The same paths with dry-run enabled.
    pub fn dry_run(&self) -> GcConfig {
        self.config.clone().with_dry_run(true)
    }

    pub fn registry(&self) -> Layout<'_> {
        Layout::new(&self.config.registry_path)
    }

    pub fn quarantine(&self) -> Layout<'_> {
        Layout::new(&self.config.delete_path)
    }

    /// Adds an image with a small payload.  `ancestry` of `None` leaves the file out.
    pub fn image(&self, id: &str, ancestry: Option<&[&str]>) -> PathBuf {
        let dir = self.registry().image_dir(id);
        create_dir_all(&dir).unwrap();
        write(dir.join("layer"), format!("payload of {id}")).unwrap();
        write(dir.join("json"), format!(r#"{{"id":"{id}"}}"#)).unwrap();
        if let Some(ancestry) = ancestry {
            write(
                dir.join("ancestry"),
                serde_json::to_vec(ancestry).unwrap(),
            )
            .unwrap();
        }
        dir
    }

    /// Adds an image whose ancestry is `chain`, i.e. `chain[0]` with parents `chain[1..]`.
    pub fn chain(&self, chain: &[&str]) {
        for (n, id) in chain.iter().enumerate() {
            self.image(id, Some(&chain[n..]));
        }
    }

    pub fn tag(&self, repository: &str, tag: &str, id: &str) {
        let dir = self.registry().repository_dir(repository);
        create_dir_all(&dir).unwrap();
        write(dir.join(format!("tag_{tag}")), id).unwrap();
    }

    pub fn index(&self, repository: &str, ids: &[&str]) -> PathBuf {
        let entries: Vec<_> = ids
            .iter()
            .map(|id| serde_json::json!({ "id": id }))
            .collect();
        self.raw_index(repository, &serde_json::to_vec(&entries).unwrap())
    }

    pub fn raw_index(&self, repository: &str, data: &[u8]) -> PathBuf {
        let dir = self.registry().repository_dir(repository);
        create_dir_all(&dir).unwrap();
        let path = dir.join("_index_images");
        write(&path, data).unwrap();
        path
    }

    pub fn image_exists(&self, id: &str) -> bool {
        self.registry().image_dir(id).exists()
    }

    pub fn quarantined(&self, id: &str) -> bool {
        self.quarantine().image_dir(id).exists()
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Run configuration.

use std::path::PathBuf;

/// Default location of the registry storage.
pub const DEFAULT_REGISTRY_PATH: &str = "/var/lib/docker-registry";

/// Default location of the quarantine area.
pub const DEFAULT_DELETE_PATH: &str = "/var/lib/docker-registry-delete";

/// Everything a collection run needs to know, passed explicitly to each component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Root of the live registry (contains `images/` and `repositories/`).
    pub registry_path: PathBuf,
    /// Root of the quarantine area, disjoint from the registry.
    pub delete_path: PathBuf,
    /// Compute and report every action without mutating the filesystem.
    pub dry_run: bool,
}

impl GcConfig {
    pub fn new(registry_path: impl Into<PathBuf>, delete_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            delete_path: delete_path.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_PATH, DEFAULT_DELETE_PATH)
    }
}

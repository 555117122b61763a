//! Errors that stop a run before anything is touched.
//!
//! Everything else (unreadable metadata, failed copies, failed index writes) is reported per
//! item and never aborts collection; see [`crate::gc::Failure`].

use std::path::PathBuf;

/// The quarantine area could not be prepared.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Something other than a directory is in the way.
    #[error("path {0} exists and is not a directory")]
    NotADirectory(PathBuf),

    /// Creating the directory failed.
    #[error("cannot create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path exists but could not be inspected.
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a repository's `_index_images` was left as it was.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// The original could not be saved to the quarantine area; the live index is untouched.
    #[error("cannot back up index: {0:#}")]
    Backup(anyhow::Error),

    /// The backup exists but the live index could not be replaced.
    #[error("cannot write index: {0:#}")]
    Write(anyhow::Error),
}

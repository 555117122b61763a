//! Offline garbage collection for a docker registry stored on disk.
//!
//! The registry is a plain directory tree:
//!
//! ```text
//! registry/
//! ├── images/
//! │   └── <id>/
//! │       ├── ancestry          # JSON array: <id> followed by its parents
//! │       └── ...               # layer payload, copied wholesale
//! └── repositories/
//!     └── <namespace>/
//!         └── <name>/
//!             ├── tag_<tag>     # file content is the tagged image ID
//!             └── _index_images # JSON array of {"id": ...} entries
//! ```
//!
//! Collection is mark and sweep. Every tag is resolved to an image and its ancestry chain is
//! added to the reachable set. Images in the inventory that were never reached are moved to a
//! quarantine directory (copy first, then remove), and stale entries are dropped from each
//! repository's `_index_images` after backing the original up into the quarantine area.
//!
//! Nothing is ever deleted without a copy existing first, so an interrupted run leaves at worst
//! an image present in both places. Running again finishes the job.
//!
//! See [`gc::collect`] for the entry point.

#[macro_use]
mod trace;

pub mod config;
pub mod error;
pub mod gc;
pub mod index;
pub mod layout;
pub mod quarantine;
pub mod reachability;
pub mod report;
pub mod scan;
pub mod set;
pub mod util;

#[cfg(any(test, feature = "test"))]
pub mod test;

/// Content-addressable identifier of an image: the name of its directory under `images/`.
pub type ImageId = String;

/// Repository name in `namespace/name` form.
pub type RepositoryName = String;

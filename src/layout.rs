//! Where things live in the registry and in the quarantine area.
//!
//! Both trees share the same shape below their root, which is what makes a quarantined image
//! or index backup easy to put back by hand: move `<delete>/X` to `<registry>/X`.

use std::path::{Path, PathBuf};

pub const IMAGES_DIR: &str = "images";
pub const REPOSITORIES_DIR: &str = "repositories";
pub const ANCESTRY_FILE: &str = "ancestry";
pub const INDEX_FILE: &str = "_index_images";

/// Directory entries starting with this prefix are tags; their content is an image ID.
pub const TAG_PREFIX: &str = "tag_";

/// Path helper over a registry-shaped directory tree.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a> {
    root: &'a Path,
}

impl<'a> Layout<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &'a Path {
        self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn image_dir(&self, id: &str) -> PathBuf {
        self.images_dir().join(id)
    }

    pub fn ancestry_file(&self, id: &str) -> PathBuf {
        self.image_dir(id).join(ANCESTRY_FILE)
    }

    pub fn repositories_dir(&self) -> PathBuf {
        self.root.join(REPOSITORIES_DIR)
    }

    /// `repository` is in `namespace/name` form.
    pub fn repository_dir(&self, repository: &str) -> PathBuf {
        self.repositories_dir().join(repository)
    }

    pub fn index_file(&self, repository: &str) -> PathBuf {
        self.repository_dir(repository).join(INDEX_FILE)
    }
}

/// Whether `id` can safely be used as a single path component below `images/`.
pub fn is_valid_image_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains('/') && !id.contains('\0')
}

//! A grow-only set of image identifiers.

use std::collections::HashSet;

use crate::ImageId;

/// Deduplicated collection of image IDs, used to accumulate the reachable set during a run.
///
/// There is no removal: the set only grows while ancestry chains are walked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    ids: HashSet<ImageId>,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, returning `true` if it was not already present.
    pub fn add(&mut self, id: impl Into<ImageId>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// All members, in no particular order.
    pub fn keys(&self) -> Vec<ImageId> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<ImageId>> FromIterator<S> for IdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<S: Into<ImageId>> Extend<S> for IdSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for id in iter {
            self.add(id);
        }
    }
}

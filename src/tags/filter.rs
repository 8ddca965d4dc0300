//! Tag filter implementation for block and role selection.

use super::{special, Tags};

/// A filter for selecting blocks and roles based on their effective tags.
///
/// Built from the run's `--tags` and `--skip-tags` lists. An empty filter
/// selects everything except nodes tagged `never`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// Tags to include (nodes must match at least one)
    tags: Vec<String>,
    /// Tags to skip (nodes matching any are excluded)
    skip_tags: Vec<String>,
}

impl TagFilter {
    /// Create a new empty tag filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the include tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = normalize(tags);
        self
    }

    /// Set the skip tags
    pub fn with_skip_tags(mut self, tags: Vec<String>) -> Self {
        self.skip_tags = normalize(tags);
        self
    }

    /// Include tags of the filter
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Skip tags of the filter
    pub fn skip_tags(&self) -> &[String] {
        &self.skip_tags
    }

    /// Check if any filters are active
    pub fn is_active(&self) -> bool {
        !self.tags.is_empty() || !self.skip_tags.is_empty()
    }

    /// Check if a node with the given effective tags should run
    ///
    /// # Logic
    ///
    /// 1. Without include tags everything runs except `never`.
    /// 2. With include tags, `always` runs; `all` runs everything but `never`;
    ///    `tagged`/`untagged` match on the presence of tags; otherwise at
    ///    least one tag must be selected.
    /// 3. Skip tags then remove: `all` (except `always` unless `always` is
    ///    skipped too), any intersecting tag, `tagged` and `untagged`.
    pub fn is_enabled(&self, tags: &Tags) -> bool {
        self.selected(tags) && !self.skipped(tags)
    }

    fn selected(&self, tags: &Tags) -> bool {
        let never = tags.contains(special::NEVER);
        if self.tags.is_empty() {
            return !never;
        }
        if tags.contains(special::ALWAYS) {
            return true;
        }
        if self.includes(special::ALL) && !never {
            return true;
        }
        if self.includes(special::TAGGED) && !never && !tags.is_empty() {
            return true;
        }
        if self.includes(special::UNTAGGED) && tags.is_empty() {
            return true;
        }
        tags.as_slice().iter().any(|t| self.includes(t))
    }

    fn skipped(&self, tags: &Tags) -> bool {
        if self.skip_tags.is_empty() {
            return false;
        }
        let always = tags.contains(special::ALWAYS);
        if self.skips(special::ALL) && (!always || self.skips(special::ALWAYS)) {
            return true;
        }
        if always && !self.skips(special::ALWAYS) {
            return false;
        }
        if tags.as_slice().iter().any(|t| self.skips(t)) {
            return true;
        }
        if self.skips(special::TAGGED) && !tags.is_empty() {
            return true;
        }
        self.skips(special::UNTAGGED) && tags.is_empty()
    }

    fn includes(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    fn skips(&self, tag: &str) -> bool {
        self.skip_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Split comma separated entries and drop empties
fn normalize(tags: Vec<String>) -> Vec<String> {
    tags.iter()
        .flat_map(|t| t.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

//! Tag system for block and role selection.
//!
//! Every play, role and block may carry tags. A node's effective tags are its
//! own tags joined with those of all its ancestors, and that set is tested
//! against the run's `--tags`/`--skip-tags` filter before anything beneath the
//! node executes.
//!
//! # Special Tags
//!
//! - `always`: runs regardless of tag selection (unless explicitly skipped)
//! - `never`: never runs unless explicitly included with `--tags never`
//! - `tagged`: matches any node that has at least one tag
//! - `untagged`: matches any node with no tags
//! - `all`: matches everything
//!
//! # Example
//!
//! ```rust
//! use kubeplay::tags::{TagFilter, Tags};
//!
//! let filter = TagFilter::new()
//!     .with_tags(vec!["deploy".to_string()])
//!     .with_skip_tags(vec!["debug".to_string()]);
//!
//! let play = Tags::from(vec!["deploy"]);
//! let block = Tags::from(vec!["web"]).join(&play);
//! assert!(filter.is_enabled(&block));
//! ```

mod filter;

pub use filter::TagFilter;

use serde::{Deserialize, Deserializer, Serialize};

/// Special tag constants
pub mod special {
    /// Tag that causes a node to always run regardless of tag selection
    pub const ALWAYS: &str = "always";

    /// Tag that causes a node to never run unless explicitly selected
    pub const NEVER: &str = "never";

    /// Matches any node that has at least one tag
    pub const TAGGED: &str = "tagged";

    /// Matches any node with no tags
    pub const UNTAGGED: &str = "untagged";

    /// Matches all nodes
    pub const ALL: &str = "all";
}

/// Check if a tag is a special tag
pub fn is_special_tag(tag: &str) -> bool {
    matches!(
        tag.to_lowercase().as_str(),
        special::ALWAYS | special::NEVER | special::TAGGED | special::UNTAGGED | special::ALL
    )
}

/// An ordered, de-duplicated tag set.
///
/// Deserializes from a single string (`tags: deploy`), a comma separated
/// string or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tags(Vec<String>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// The tags in order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether the set has no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the set contains a tag (case-insensitive)
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Effective tags of a child: the parent's tags followed by the child's own.
    pub fn join(&self, parent: &Tags) -> Tags {
        let mut joined = parent.clone();
        for tag in &self.0 {
            joined.push(tag.clone());
        }
        joined
    }

    fn push(&mut self, tag: String) {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !self.0.contains(&tag) {
            self.0.push(tag);
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for Tags {
    fn from(tags: Vec<S>) -> Self {
        let mut set = Tags::new();
        for tag in tags {
            set.push(tag.into());
        }
        set
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Tags::new(),
            Some(Raw::One(s)) => Tags::from(s.split(',').map(str::to_string).collect::<Vec<_>>()),
            Some(Raw::Many(list)) => Tags::from(list),
        })
    }
}

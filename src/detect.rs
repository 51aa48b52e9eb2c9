//! Existing-item detection for incremental migration.
//!
//! Every migrated work item is titled `"<source-key> <summary>"`, so a source
//! issue is considered migrated when some work item's title starts with its
//! key. Nothing else is persisted: re-querying the target is the only
//! resume state.

use serde::Serialize;

use crate::identity::IdentityMap;
use crate::model::{SourceIssue, WorkItemId};

/// A work item already present in the target project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingWorkItem {
    pub id: WorkItemId,
    pub title: String,
    pub state: Option<String>,
    pub work_item_type: Option<String>,
}

/// How strictly a title prefix must match a source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMatchMode {
    /// The character after the key must not be alphanumeric, so `AB-1`
    /// does not claim `AB-10 ...`.
    #[default]
    Boundary,
    /// Plain `starts_with`.
    LoosePrefix,
}

impl KeyMatchMode {
    #[must_use]
    pub const fn from_loose_flag(loose: bool) -> Self {
        if loose { Self::LoosePrefix } else { Self::Boundary }
    }
}

/// Whether `title` was produced for a source issue with key `key`.
#[must_use]
pub fn title_matches_key(title: &str, key: &str, mode: KeyMatchMode) -> bool {
    if key.is_empty() {
        return false;
    }
    let Some(rest) = title.strip_prefix(key) else {
        return false;
    };
    match mode {
        KeyMatchMode::LoosePrefix => true,
        KeyMatchMode::Boundary => rest.chars().next().is_none_or(|c| !c.is_alphanumeric()),
    }
}

/// Source key embedded in a title: its first whitespace-delimited token.
#[must_use]
pub fn source_key_of_title(title: &str) -> Option<&str> {
    title.split_whitespace().next()
}

/// Snapshot of the target's work items, searched per source issue.
#[derive(Debug, Clone, Default)]
pub struct ExistingItemIndex {
    items: Vec<ExistingWorkItem>,
    mode: KeyMatchMode,
}

impl ExistingItemIndex {
    #[must_use]
    pub fn new(items: Vec<ExistingWorkItem>, mode: KeyMatchMode) -> Self {
        Self { items, mode }
    }

    #[must_use]
    pub fn items(&self) -> &[ExistingWorkItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First work item, in listing order, whose title carries the issue's key.
    #[must_use]
    pub fn find(&self, issue: &SourceIssue) -> Option<&ExistingWorkItem> {
        self.items
            .iter()
            .find(|item| title_matches_key(&item.title, &issue.key, self.mode))
    }

    /// Look the issue up and, on a match, register the pair in `identity`
    /// so links into already-migrated items still resolve.
    ///
    /// A match that would break the one-to-one mapping is logged and still
    /// reported as found, so the issue is not created a second time.
    pub fn detect(&self, issue: &SourceIssue, identity: &mut IdentityMap) -> Option<&ExistingWorkItem> {
        let found = self.find(issue)?;
        if let Err(conflict) = identity.insert(&issue.id, found.id) {
            tracing::warn!(key = %issue.key, work_item = found.id, %conflict, "Existing item matched twice");
        }
        Some(found)
    }
}

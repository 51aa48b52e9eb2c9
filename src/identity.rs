//! Bidirectional association between source issues and target work items.
//!
//! Two one-directional tables keyed by plain ids keep the map serializable
//! and free of object references. The association is one-to-one: a source
//! issue maps to at most one work item and a work item maps back to at most
//! one source issue.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::WorkItemId;

/// Attempted to break the one-to-one association.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityConflict {
    #[error("source issue {source_id} is already mapped to work item {existing}, refusing {attempted}")]
    SourceAlreadyMapped {
        source_id: String,
        existing: WorkItemId,
        attempted: WorkItemId,
    },
    #[error("work item {work_item} is already mapped to source issue {existing}, refusing {attempted}")]
    TargetAlreadyMapped {
        work_item: WorkItemId,
        existing: String,
        attempted: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityMap {
    by_source: BTreeMap<String, WorkItemId>,
    by_target: BTreeMap<WorkItemId, String>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `source_id` with `work_item`.
    ///
    /// Re-inserting an identical pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityConflict`] if either side is already mapped to
    /// something else; the map is left unchanged.
    pub fn insert(
        &mut self,
        source_id: &str,
        work_item: WorkItemId,
    ) -> Result<(), IdentityConflict> {
        if let Some(&existing) = self.by_source.get(source_id) {
            if existing == work_item {
                return Ok(());
            }
            return Err(IdentityConflict::SourceAlreadyMapped {
                source_id: source_id.to_string(),
                existing,
                attempted: work_item,
            });
        }
        if let Some(existing) = self.by_target.get(&work_item) {
            return Err(IdentityConflict::TargetAlreadyMapped {
                work_item,
                existing: existing.clone(),
                attempted: source_id.to_string(),
            });
        }

        self.by_source.insert(source_id.to_string(), work_item);
        self.by_target.insert(work_item, source_id.to_string());
        Ok(())
    }

    #[must_use]
    pub fn target_for(&self, source_id: &str) -> Option<WorkItemId> {
        self.by_source.get(source_id).copied()
    }

    #[must_use]
    pub fn source_for(&self, work_item: WorkItemId) -> Option<&str> {
        self.by_target.get(&work_item).map(String::as_str)
    }

    #[must_use]
    pub fn contains_source(&self, source_id: &str) -> bool {
        self.by_source.contains_key(source_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Pairs ordered by source id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, WorkItemId)> {
        self.by_source.iter().map(|(s, &t)| (s.as_str(), t))
    }
}

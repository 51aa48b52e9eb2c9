//! Backend seams: where issues come from and where work items go.
//!
//! The migration engine only talks to [`SourceBackend`] and [`TargetBackend`].
//! The HTTP clients in [`jira`], [`youtrack`] and [`azure`] implement them
//! against the real services; tests substitute in-memory fakes.

pub mod azure;
pub(crate) mod http;
pub mod jira;
pub mod youtrack;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::ExistingWorkItem;
use crate::error::Result;
use crate::model::{Attachment, SourceBatch, SourceSystem, TargetRecord, WorkItemId};

/// Reference names of work item fields updated after creation.
pub mod fields {
    pub const STATE: &str = "System.State";
    pub const DESCRIPTION: &str = "System.Description";
    pub const REPRO_STEPS: &str = "Microsoft.VSTS.TCM.ReproSteps";
}

/// One field assignment in an update call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUpdate {
    pub field: &'static str,
    pub value: Value,
}

impl FieldUpdate {
    #[must_use]
    pub fn new(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

/// A relation as reported back by the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub rel: String,
    pub url: String,
}

/// An upstream tracker that issues are pulled from.
pub trait SourceBackend {
    fn system(&self) -> SourceSystem;

    /// Pull every issue in scope, in the tracker's order, stopping after
    /// `limit` issues when given.
    ///
    /// # Errors
    ///
    /// Fails when a listing page cannot be fetched or decoded.
    fn pull_issues(&self, limit: Option<usize>) -> Result<SourceBatch>;

    /// Download the bytes of one attachment.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or non-success responses.
    fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>>;
}

/// The work-tracking backend records are pushed into.
///
/// Every call is one blocking network operation.
pub trait TargetBackend {
    /// Upload raw bytes; returns the backend-managed URL.
    ///
    /// # Errors
    ///
    /// Fails when the upload is rejected.
    fn upload_attachment(&self, file_name: &str, content: &[u8]) -> Result<String>;

    /// Create the work item with every field except its final state.
    ///
    /// # Errors
    ///
    /// Fails when the backend refuses the item; nothing is created then.
    fn create_work_item(&self, record: &TargetRecord) -> Result<WorkItemId>;

    /// # Errors
    ///
    /// Fails when the item is missing or a value is refused.
    fn update_fields(&self, id: WorkItemId, updates: &[FieldUpdate]) -> Result<()>;

    /// Add a relation of kind `rel` from `id` to `url`.
    ///
    /// # Errors
    ///
    /// Fails when either endpoint is missing or the relation is refused.
    fn add_relation(&self, id: WorkItemId, rel: &str, url: &str) -> Result<()>;

    /// # Errors
    ///
    /// Fails when the item is missing.
    fn add_comment(&self, id: WorkItemId, text: &str) -> Result<()>;

    /// Current relations of a work item.
    ///
    /// # Errors
    ///
    /// Fails when the item cannot be read.
    fn relations(&self, id: WorkItemId) -> Result<Vec<Relation>>;

    /// Canonical URL of a work item, as used in relation patches.
    fn work_item_url(&self, id: WorkItemId) -> String;

    /// Every work item id in the project.
    ///
    /// # Errors
    ///
    /// Fails when the id query fails.
    fn list_work_item_ids(&self) -> Result<Vec<WorkItemId>>;

    /// # Errors
    ///
    /// Fails when the batch read fails.
    fn fetch_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<ExistingWorkItem>>;

    /// Permanently delete a work item.
    ///
    /// # Errors
    ///
    /// Fails when the item is missing or cannot be deleted.
    fn delete_work_item(&self, id: WorkItemId) -> Result<()>;
}

/// List and fetch every work item in the target project.
///
/// # Errors
///
/// Fails if the id listing or any fetch batch fails; a partial snapshot
/// would make the detector re-create items.
pub fn pull_existing_items(
    target: &dyn TargetBackend,
    batch_size: usize,
) -> Result<Vec<ExistingWorkItem>> {
    let ids = target.list_work_item_ids()?;
    let mut items = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(batch_size.max(1)) {
        items.extend(target.fetch_work_items(chunk)?);
    }
    tracing::info!(count = items.len(), "Pulled existing work items");
    Ok(items)
}

/// The work item a relation URL points at.
///
/// The target reports relation URLs in whatever form it stores them, project
/// scoped or organization scoped, so only the id after `workitems/` is
/// compared.
#[must_use]
pub fn work_item_id_from_url(url: &str) -> Option<WorkItemId> {
    let lowered = url.trim().to_ascii_lowercase();
    let (_, tail) = lowered.rsplit_once("/workitems/")?;
    let path = tail.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/').parse().ok()
}

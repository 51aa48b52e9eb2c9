//! Per-item push pipeline.
//!
//! One staged [`TargetRecord`] is driven through a fixed sequence of target
//! calls. Phases never run backwards and are never retried. A failing phase is
//! logged, recorded as a [`PhaseFailure`], and the pipeline moves on with
//! whatever partial state exists. The one exception is creation: without a
//! work item id no later phase can run, so the item stops there and stays out
//! of the identity map until a later run picks it up again.

use serde::Serialize;
use std::fmt;

use crate::backend::{FieldUpdate, SourceBackend, TargetBackend, fields};
use crate::identity::IdentityMap;
use crate::model::{ATTACHED_FILE, CorrelationId, SourceIssue, TargetRecord, WorkItemId};
use crate::rewrite::ReferenceRewriter;

/// Pipeline position of one record. Ordered; no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Built,
    AttachmentsUploaded,
    Created,
    StateSet,
    AttachmentsAssociated,
    ReferencesRewritten,
    CommentsPushed,
    Done,
}

impl PipelinePhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::AttachmentsUploaded => "attachments_uploaded",
            Self::Created => "created",
            Self::StateSet => "state_set",
            Self::AttachmentsAssociated => "attachments_associated",
            Self::ReferencesRewritten => "references_rewritten",
            Self::CommentsPushed => "comments_pushed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a recoverable failure happened, across both migration stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AttachmentFetch,
    AttachmentUpload,
    Creation,
    IdentityRegistration,
    StateTransition,
    AttachmentAssociation,
    ReferenceRewrite,
    CommentPush,
    ParentResolution,
    LinkResolution,
    LinkGuard,
    LinkPush,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AttachmentFetch => "attachment_fetch",
            Self::AttachmentUpload => "attachment_upload",
            Self::Creation => "creation",
            Self::IdentityRegistration => "identity_registration",
            Self::StateTransition => "state_transition",
            Self::AttachmentAssociation => "attachment_association",
            Self::ReferenceRewrite => "reference_rewrite",
            Self::CommentPush => "comment_push",
            Self::ParentResolution => "parent_resolution",
            Self::LinkResolution => "link_resolution",
            Self::LinkGuard => "link_guard",
            Self::LinkPush => "link_push",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure absorbed at a phase boundary, with enough context to replay
/// that one call by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseFailure {
    pub step: Step,
    /// What the call was about: an attachment name, a comment index, a link.
    pub entity: String,
    pub message: String,
}

impl PhaseFailure {
    pub fn new(step: Step, entity: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            step,
            entity: entity.into(),
            message: message.to_string(),
        }
    }
}

/// Result of pushing one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub correlation_id: CorrelationId,
    /// Carried by the enclosing report when serialized.
    #[serde(skip)]
    pub source_id: String,
    #[serde(skip)]
    pub source_key: String,
    pub work_item: Option<WorkItemId>,
    /// Last phase the pipeline passed through, failed or not.
    pub reached: PipelinePhase,
    pub failures: Vec<PhaseFailure>,
}

impl ItemOutcome {
    fn new(issue: &SourceIssue, record: &TargetRecord) -> Self {
        Self {
            correlation_id: record.correlation_id,
            source_id: issue.id.clone(),
            source_key: issue.key.clone(),
            work_item: None,
            reached: PipelinePhase::Built,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        self.work_item.is_some()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reached == PipelinePhase::Done && self.failures.is_empty()
    }

    fn fail(&mut self, failure: PhaseFailure) {
        self.failures.push(failure);
    }
}

/// Generated name of the `ordinal`-th uploaded attachment of a record.
#[must_use]
pub fn attachment_file_name(correlation_id: CorrelationId, ordinal: usize, extension: &str) -> String {
    if extension.is_empty() {
        format!("attachment-{correlation_id}-{ordinal}")
    } else {
        format!("attachment-{correlation_id}-{ordinal}.{extension}")
    }
}

/// Download every attachment of `issue` into memory.
///
/// A failed download leaves that attachment unfetched; upload skips it.
pub fn stage_attachments(source: &dyn SourceBackend, issue: &mut SourceIssue) -> Vec<PhaseFailure> {
    let mut failures = Vec::new();
    for attachment in &mut issue.attachments {
        match source.fetch_attachment(attachment) {
            Ok(bytes) => {
                tracing::debug!(key = %issue.key, file = %attachment.file_name, size = bytes.len(), "Staged attachment");
                attachment.stage(bytes);
            }
            Err(err) => {
                tracing::warn!(
                    key = %issue.key,
                    file = %attachment.file_name,
                    url = %attachment.content_url,
                    error = %err,
                    "Attachment download failed"
                );
                failures.push(PhaseFailure::new(Step::AttachmentFetch, &attachment.file_name, err));
            }
        }
    }
    failures
}

/// Drive `record` through upload, creation, state transition, attachment
/// association, reference rewriting and comment push.
///
/// Attachment bytes on both `issue` and `record` are released before
/// returning, whatever happened.
pub fn push_item(
    target: &dyn TargetBackend,
    issue: &mut SourceIssue,
    record: &mut TargetRecord,
    identity: &mut IdentityMap,
) -> ItemOutcome {
    let mut outcome = ItemOutcome::new(issue, record);
    let span = tracing::info_span!(
        "push_item",
        source_key = %issue.key,
        correlation_id = %record.correlation_id
    );
    let _guard = span.enter();

    upload_attachments(target, record, &mut outcome);
    outcome.reached = PipelinePhase::AttachmentsUploaded;

    let id = match target.create_work_item(record) {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(phase = %PipelinePhase::Created, error = %err, "Work item creation failed; item left for a later run");
            outcome.fail(PhaseFailure::new(Step::Creation, &record.title, err));
            release(issue, record);
            return outcome;
        }
    };
    record.assign_persisted_id(id);
    outcome.work_item = Some(id);
    if let Err(conflict) = identity.insert(&issue.id, id) {
        tracing::warn!(work_item = id, %conflict, "Created item could not be registered");
        outcome.fail(PhaseFailure::new(Step::IdentityRegistration, id.to_string(), conflict));
    }
    outcome.reached = PipelinePhase::Created;

    set_state(target, id, record, &mut outcome);
    outcome.reached = PipelinePhase::StateSet;

    associate_attachments(target, id, record, &mut outcome);
    outcome.reached = PipelinePhase::AttachmentsAssociated;

    let rewriter = ReferenceRewriter::for_item(issue, record);
    rewrite_references(target, id, record, &rewriter, &mut outcome);
    outcome.reached = PipelinePhase::ReferencesRewritten;

    push_comments(target, id, record, &rewriter, &mut outcome);
    outcome.reached = PipelinePhase::CommentsPushed;

    release(issue, record);
    outcome.reached = PipelinePhase::Done;
    tracing::info!(failures = outcome.failures.len(), "{} -> {id}", issue.key);
    outcome
}

fn upload_attachments(target: &dyn TargetBackend, record: &mut TargetRecord, outcome: &mut ItemOutcome) {
    let correlation_id = record.correlation_id;
    let mut ordinal = 1;
    for attachment in &mut record.attachments {
        let Some(content) = attachment.content() else {
            tracing::debug!(file = %attachment.original_name, "Attachment not staged; skipping upload");
            continue;
        };
        let file_name = attachment_file_name(correlation_id, ordinal, attachment.extension());
        match target.upload_attachment(&file_name, content) {
            Ok(url) => {
                tracing::debug!(file = %file_name, %url, "Uploaded attachment");
                attachment.mark_uploaded(file_name, url);
                ordinal += 1;
            }
            Err(err) => {
                tracing::warn!(
                    phase = %PipelinePhase::AttachmentsUploaded,
                    file = %attachment.original_name,
                    error = %err,
                    "Attachment upload failed"
                );
                outcome.fail(PhaseFailure::new(Step::AttachmentUpload, &attachment.original_name, err));
            }
        }
    }
}

fn set_state(target: &dyn TargetBackend, id: WorkItemId, record: &TargetRecord, outcome: &mut ItemOutcome) {
    if record.state.is_empty() {
        return;
    }
    let update = [FieldUpdate::new(fields::STATE, record.state.as_str())];
    if let Err(err) = target.update_fields(id, &update) {
        tracing::warn!(
            phase = %PipelinePhase::StateSet,
            work_item = id,
            state = %record.state,
            error = %err,
            "State transition failed; item keeps the initial state"
        );
        outcome.fail(PhaseFailure::new(Step::StateTransition, &record.state, err));
    }
}

fn associate_attachments(
    target: &dyn TargetBackend,
    id: WorkItemId,
    record: &TargetRecord,
    outcome: &mut ItemOutcome,
) {
    for attachment in &record.attachments {
        let Some(url) = attachment.url.as_deref() else {
            continue;
        };
        if let Err(err) = target.add_relation(id, ATTACHED_FILE, url) {
            tracing::warn!(
                phase = %PipelinePhase::AttachmentsAssociated,
                work_item = id,
                %url,
                error = %err,
                "Attachment association failed"
            );
            outcome.fail(PhaseFailure::new(Step::AttachmentAssociation, url, err));
        }
    }
}

fn rewrite_references(
    target: &dyn TargetBackend,
    id: WorkItemId,
    record: &mut TargetRecord,
    rewriter: &ReferenceRewriter,
    outcome: &mut ItemOutcome,
) {
    if rewriter.is_noop() {
        return;
    }
    let description = rewriter.rewrite(&record.description);
    let steps = record.steps_to_reproduce.as_deref().map(|s| rewriter.rewrite(s));

    let mut updates = Vec::new();
    if description != record.description {
        updates.push(FieldUpdate::new(fields::DESCRIPTION, description.as_str()));
    }
    if steps != record.steps_to_reproduce {
        if let Some(steps) = steps.as_deref() {
            updates.push(FieldUpdate::new(fields::REPRO_STEPS, steps));
        }
    }
    if updates.is_empty() {
        return;
    }

    match target.update_fields(id, &updates) {
        Ok(()) => {
            tracing::debug!(work_item = id, fields = updates.len(), "Rewrote attachment references");
            record.description = description;
            record.steps_to_reproduce = steps;
        }
        Err(err) => {
            tracing::warn!(
                phase = %PipelinePhase::ReferencesRewritten,
                work_item = id,
                error = %err,
                "Persisting rewritten references failed"
            );
            outcome.fail(PhaseFailure::new(Step::ReferenceRewrite, "description", err));
        }
    }
}

fn push_comments(
    target: &dyn TargetBackend,
    id: WorkItemId,
    record: &mut TargetRecord,
    rewriter: &ReferenceRewriter,
    outcome: &mut ItemOutcome,
) {
    for (index, comment) in record.comments.iter_mut().enumerate() {
        comment.text = rewriter.rewrite(&comment.text);
        if let Err(err) = target.add_comment(id, &comment.rendered()) {
            tracing::warn!(
                phase = %PipelinePhase::CommentsPushed,
                work_item = id,
                comment = index,
                author = %comment.author.display_name(),
                error = %err,
                "Comment push failed"
            );
            outcome.fail(PhaseFailure::new(Step::CommentPush, format!("comment #{index}"), err));
        }
    }
}

fn release(issue: &mut SourceIssue, record: &mut TargetRecord) {
    issue.release_attachments();
    record.release_attachments();
}

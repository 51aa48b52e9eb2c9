//! In-memory staging records for the target work-tracking backend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::source::{Attachment, AttachmentPhase, User, file_extension};

/// Numeric id assigned by the target backend.
pub type WorkItemId = u32;

/// Relation name for attaching an uploaded file to a work item.
pub const ATTACHED_FILE: &str = "AttachedFile";

/// Locally generated key for a record before it has a [`WorkItemId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator of [`CorrelationId`]s, owned by one migration run.
#[derive(Debug, Clone)]
pub struct CorrelationSequence {
    next: u64,
}

impl CorrelationSequence {
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Seed from the wall clock (milliseconds) so ids from separate runs
    /// rarely collide in generated attachment names.
    #[must_use]
    pub fn from_clock() -> Self {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);
        Self::starting_at(millis)
    }

    pub fn next_id(&mut self) -> CorrelationId {
        let id = CorrelationId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Target relation vocabulary for links between work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    Related,
    Duplicate,
    DependsOn,
    /// Child to parent.
    Hierarchy,
}

impl RelationType {
    /// Reference name used in relation patches, as pushed from the origin endpoint.
    #[must_use]
    pub const fn reference_name(self) -> &'static str {
        match self {
            Self::Related => "System.LinkTypes.Related",
            Self::Duplicate => "System.LinkTypes.Duplicate-Reverse",
            Self::DependsOn => "System.LinkTypes.Dependency-Reverse",
            Self::Hierarchy => "System.LinkTypes.Hierarchy-Reverse",
        }
    }

    #[must_use]
    pub fn from_reference_name(name: &str) -> Option<Self> {
        [Self::Related, Self::Duplicate, Self::DependsOn, Self::Hierarchy]
            .into_iter()
            .find(|r| r.reference_name().eq_ignore_ascii_case(name))
    }

    /// Symmetric relations look the same from both endpoints.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, Self::Related)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Related => "related",
            Self::Duplicate => "duplicate",
            Self::DependsOn => "depends-on",
            Self::Hierarchy => "hierarchy",
        };
        f.write_str(name)
    }
}

/// Target-side view of one source attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetAttachment {
    /// Position of the originating attachment in `SourceIssue::attachments`.
    pub source_index: usize,
    pub original_name: String,
    /// Generated name, set when the upload succeeds.
    pub file_name: Option<String>,
    /// Backend-managed URL, set when the upload succeeds.
    pub url: Option<String>,
    #[serde(skip)]
    content: Option<Vec<u8>>,
}

impl TargetAttachment {
    /// Take over the staged bytes of `attachment`.
    #[must_use]
    pub fn from_source(source_index: usize, attachment: &mut Attachment) -> Self {
        Self {
            source_index,
            original_name: attachment.file_name.clone(),
            file_name: None,
            url: None,
            content: attachment.take_content(),
        }
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        file_extension(&self.original_name)
    }

    #[must_use]
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn mark_uploaded(&mut self, file_name: String, url: String) {
        self.file_name = Some(file_name);
        self.url = Some(url);
    }

    pub fn release(&mut self) {
        self.content = None;
    }

    #[must_use]
    pub const fn phase(&self) -> AttachmentPhase {
        match (&self.url, &self.content) {
            (Some(_), _) => AttachmentPhase::Uploaded,
            (None, Some(_)) => AttachmentPhase::Staged,
            (None, None) => AttachmentPhase::Unfetched,
        }
    }
}

/// A comment waiting to be pushed with an attribution banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetComment {
    pub text: String,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
}

impl TargetComment {
    /// Comment body with the author/timestamp banner prepended.
    #[must_use]
    pub fn rendered(&self) -> String {
        let when = self
            .created_at
            .map(|t| format!(" on {}", t.format("%d.%m.%Y %H:%M")))
            .unwrap_or_default();
        format!(
            "<i>Commented by <a href='mailto:{}'>{}</a>{when}:</i><br>{}",
            self.author.mail_address(),
            self.author.display_name(),
            self.text
        )
    }
}

/// Mutable staging record assembled from a source issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRecord {
    pub correlation_id: CorrelationId,
    pub source_id: String,
    pub source_key: String,
    pub work_item_type: String,
    pub title: String,
    pub description: String,
    pub steps_to_reproduce: Option<String>,
    pub state: String,
    pub priority: Option<u8>,
    pub blocked: bool,
    pub activity: Option<String>,
    pub created_by: User,
    pub created_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<User>,
    pub tester: Option<User>,
    pub tags: BTreeSet<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub target_date: Option<DateTime<Utc>>,
    pub system_info: Option<String>,
    pub found_in: Option<String>,
    pub attachments: Vec<TargetAttachment>,
    pub comments: Vec<TargetComment>,
    /// Parent work item, set by the link rebuilder.
    pub parent: Option<WorkItemId>,
    persisted_id: Option<WorkItemId>,
}

impl TargetRecord {
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        source_id: impl Into<String>,
        source_key: impl Into<String>,
        work_item_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            source_id: source_id.into(),
            source_key: source_key.into(),
            work_item_type: work_item_type.into(),
            title: title.into(),
            description: String::new(),
            steps_to_reproduce: None,
            state: String::new(),
            priority: None,
            blocked: false,
            activity: None,
            created_by: User::default(),
            created_at: None,
            assigned_to: None,
            tester: None,
            tags: BTreeSet::new(),
            start_date: None,
            target_date: None,
            system_info: None,
            found_in: None,
            attachments: Vec::new(),
            comments: Vec::new(),
            parent: None,
            persisted_id: None,
        }
    }

    #[must_use]
    pub const fn persisted_id(&self) -> Option<WorkItemId> {
        self.persisted_id
    }

    /// Record the id the backend assigned on creation.
    pub fn assign_persisted_id(&mut self, id: WorkItemId) {
        self.persisted_id = Some(id);
    }

    /// Tags in the target's `"; "`-joined form.
    #[must_use]
    pub fn tags_field(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join("; ")
    }

    pub fn release_attachments(&mut self) {
        for attachment in &mut self.attachments {
            attachment.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn correlation_sequence_is_monotonic() {
        let mut seq = CorrelationSequence::starting_at(41);
        let a = seq.next_id();
        let b = seq.next_id();
        assert_eq!(a.get(), 41);
        assert_eq!(b.get(), 42);
        assert!(a < b);
    }

    #[test]
    fn sequences_do_not_share_state() {
        let mut first = CorrelationSequence::starting_at(7);
        let mut second = CorrelationSequence::starting_at(7);
        first.next_id();
        assert_eq!(second.next_id().get(), 7);
    }

    #[test]
    fn relation_reference_names_roundtrip() {
        for rel in [
            RelationType::Related,
            RelationType::Duplicate,
            RelationType::DependsOn,
            RelationType::Hierarchy,
        ] {
            assert_eq!(RelationType::from_reference_name(rel.reference_name()), Some(rel));
        }
        assert_eq!(RelationType::from_reference_name("AttachedFile"), None);
    }

    #[test]
    fn comment_banner_attributes_author() {
        let comment = TargetComment {
            text: "looks good".to_string(),
            author: User::new("u1", "Xavier").with_email("x@example.test"),
            created_at: Some(Utc.with_ymd_and_hms(2024, 2, 9, 8, 5, 0).unwrap()),
        };
        assert_eq!(
            comment.rendered(),
            "<i>Commented by <a href='mailto:x@example.test'>Xavier</a> on 09.02.2024 08:05:</i><br>looks good"
        );
    }

    #[test]
    fn target_attachment_lifecycle() {
        let mut source = Attachment::new("1", "log.txt", "/a/1", "https://src/a/1");
        source.stage(b"hello".to_vec());
        let mut att = TargetAttachment::from_source(0, &mut source);
        assert_eq!(att.phase(), AttachmentPhase::Staged);
        assert_eq!(source.phase(), AttachmentPhase::Released);

        att.mark_uploaded("attachment-9-1.txt".to_string(), "https://t/att/1".to_string());
        att.release();
        assert_eq!(att.phase(), AttachmentPhase::Uploaded);
        assert!(att.content().is_none());
        assert_eq!(att.url.as_deref(), Some("https://t/att/1"));
    }

    #[test]
    fn tags_join_with_semicolons() {
        let mut record =
            TargetRecord::new(CorrelationSequence::starting_at(1).next_id(), "1", "A-1", "Bug", "A-1 x");
        record.tags.insert("ui".to_string());
        record.tags.insert("backend".to_string());
        assert_eq!(record.tags_field(), "backend; ui");
        assert_eq!(record.persisted_id(), None);
        record.assign_persisted_id(1200);
        assert_eq!(record.persisted_id(), Some(1200));
    }
}

//! Source-side snapshots pulled from Jira or YouTrack.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;

/// Which upstream tracker a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    Jira,
    YouTrack,
}

impl SourceSystem {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::YouTrack => "youtrack",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jira" => Ok(Self::Jira),
            "youtrack" | "yt" => Ok(Self::YouTrack),
            other => Err(MigrateError::UnknownSource(other.to_string())),
        }
    }
}

/// A person known to a source system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct User {
    /// Backend account identifier (Jira `accountId`, YouTrack user id).
    pub id: String,
    pub login: String,
    pub full_name: String,
    pub email: Option<String>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Best human-readable name: full name, then login, then account id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        [&self.full_name, &self.login, &self.id]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or("unknown", String::as_str)
    }

    /// True when nothing identifies the user.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.id.is_empty() && self.login.is_empty() && self.full_name.is_empty() && self.email.is_none()
    }

    /// Address used in `mailto:` banners and identity fields of the target.
    #[must_use]
    pub fn mail_address(&self) -> &str {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.display_name())
    }
}

/// One comment on a source issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
}

/// Lifecycle of an attachment's binary content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentPhase {
    /// URL known, bytes not yet downloaded.
    Unfetched,
    /// Bytes held in memory.
    Staged,
    /// Bytes uploaded and a target URL assigned.
    Uploaded,
    /// Bytes dropped without a target URL.
    Released,
}

/// A binary attachment on a source issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Backend attachment identifier, as embedded in inline image markup.
    pub id: String,
    pub file_name: String,
    /// Source URL exactly as it appears in rich text.
    pub url: String,
    /// Absolute URL to download the bytes from.
    pub content_url: String,
    #[serde(skip)]
    content: Option<Vec<u8>>,
    released: bool,
}

impl Attachment {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        url: impl Into<String>,
        content_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            url: url.into(),
            content_url: content_url.into(),
            content: None,
            released: false,
        }
    }

    /// File extension without the dot, or empty when the name has none.
    #[must_use]
    pub fn extension(&self) -> &str {
        file_extension(&self.file_name)
    }

    /// Hold downloaded bytes until the item's pipeline finishes.
    pub fn stage(&mut self, bytes: Vec<u8>) {
        self.content = Some(bytes);
        self.released = false;
    }

    #[must_use]
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Move the staged bytes out, leaving the attachment released.
    pub fn take_content(&mut self) -> Option<Vec<u8>> {
        let content = self.content.take();
        if content.is_some() {
            self.released = true;
        }
        content
    }

    /// Drop the in-memory bytes.
    pub fn release(&mut self) {
        if self.content.take().is_some() {
            self.released = true;
        }
    }

    #[must_use]
    pub const fn phase(&self) -> AttachmentPhase {
        if self.content.is_some() {
            AttachmentPhase::Staged
        } else if self.released {
            AttachmentPhase::Released
        } else {
            AttachmentPhase::Unfetched
        }
    }
}

pub(crate) fn file_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains(['/', '\\']) => ext,
        _ => "",
    }
}

/// Which endpoint of a link this record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkDirection {
    /// This issue is the link's origin.
    Inward,
    /// The linked issue is the origin; this is the mirrored view.
    Outward,
    /// Symmetric relation, visible identically from both ends.
    Both,
}

impl LinkDirection {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INWARD" => Some(Self::Inward),
            "OUTWARD" => Some(Self::Outward),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Link type as named by the source tracker, normalized across both systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLinkKind {
    Relates,
    Depends,
    Duplicate,
    Subtask,
    Blocks,
    Clones,
    Causes,
    Unknown,
}

impl SourceLinkKind {
    /// Classify a link type name (`"Depend"`, `"Clones"`, `"Subtask"`, ...).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "relates" | "relates to" => Self::Relates,
            "depend" | "depends" | "dependency" => Self::Depends,
            "duplicate" | "duplicates" => Self::Duplicate,
            "subtask" | "parent-child" => Self::Subtask,
            "blocks" => Self::Blocks,
            "clones" | "cloners" => Self::Clones,
            "causes" | "problem/incident" => Self::Causes,
            _ => Self::Unknown,
        }
    }
}

/// One outgoing link as seen from the issue that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLink {
    pub kind: SourceLinkKind,
    /// Raw type name, kept for log output.
    pub type_name: String,
    pub direction: LinkDirection,
    pub linked_issue_id: String,
    /// Batch position of the linked issue, set when the issue joins a [`SourceBatch`].
    pub linked_index: Option<usize>,
}

impl SourceLink {
    #[must_use]
    pub fn new(type_name: &str, direction: LinkDirection, linked_issue_id: impl Into<String>) -> Self {
        Self {
            kind: SourceLinkKind::from_name(type_name),
            type_name: type_name.to_string(),
            direction,
            linked_issue_id: linked_issue_id.into(),
            linked_index: None,
        }
    }
}

/// Immutable snapshot of one ticket from a source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceIssue {
    pub system: SourceSystem,
    /// Stable backend identifier (Jira numeric id, YouTrack database id).
    pub id: String,
    /// Human-readable key such as `ABC-42`.
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub steps_to_reproduce: Option<String>,
    pub author: User,
    pub created_at: Option<DateTime<Utc>>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<User>,
    pub tester: Option<User>,
    pub labels: BTreeSet<String>,
    pub comments: Vec<Comment>,
    pub attachments: Vec<Attachment>,
    pub links: Vec<SourceLink>,
    pub parent_id: Option<String>,
    /// Batch position of the parent, set when the issue joins a [`SourceBatch`].
    pub parent_index: Option<usize>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    /// Source-specific values consumed by the field mapping.
    pub extra_fields: BTreeMap<String, String>,
}

impl SourceIssue {
    #[must_use]
    pub fn new(
        system: SourceSystem,
        id: impl Into<String>,
        key: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            system,
            id: id.into(),
            key: key.into(),
            summary: summary.into(),
            description: None,
            steps_to_reproduce: None,
            author: User::default(),
            created_at: None,
            issue_type: None,
            status: None,
            priority: None,
            assignee: None,
            tester: None,
            labels: BTreeSet::new(),
            comments: Vec::new(),
            attachments: Vec::new(),
            links: Vec::new(),
            parent_id: None,
            parent_index: None,
            start_date: None,
            due_date: None,
            extra_fields: BTreeMap::new(),
        }
    }

    /// Order comments by creation time, ties broken by comment id.
    pub fn sort_comments(&mut self) {
        self.comments
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }

    #[must_use]
    pub fn extra(&self, name: &str) -> Option<&str> {
        self.extra_fields.get(name).map(String::as_str)
    }

    /// Drop the bytes of every attachment.
    pub fn release_attachments(&mut self) {
        for attachment in &mut self.attachments {
            attachment.release();
        }
    }
}

/// Counts from [`SourceBatch::reference_report`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceReport {
    pub parents_resolved: usize,
    pub parents_dangling: usize,
    pub links_resolved: usize,
    pub links_dangling: usize,
}

/// Every issue pulled from one source in one run, in pull order.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    issues: Vec<SourceIssue>,
    index: HashMap<String, usize>,
}

impl SourceBatch {
    /// Build the batch and point every parent and link at its batch
    /// position. A repeated source id keeps its first occurrence.
    #[must_use]
    pub fn new(issues: Vec<SourceIssue>) -> Self {
        let mut kept = Vec::with_capacity(issues.len());
        let mut index = HashMap::with_capacity(issues.len());
        for issue in issues {
            if index.contains_key(&issue.id) {
                tracing::warn!(source_id = %issue.id, key = %issue.key, "Duplicate source issue in pull; keeping first");
                continue;
            }
            index.insert(issue.id.clone(), kept.len());
            kept.push(issue);
        }
        let mut batch = Self {
            issues: kept,
            index,
        };
        batch.link_positions();
        batch
    }

    fn link_positions(&mut self) {
        let index = &self.index;
        for issue in &mut self.issues {
            issue.parent_index = issue.parent_id.as_deref().and_then(|id| index.get(id).copied());
            for link in &mut issue.links {
                link.linked_index = index.get(&link.linked_issue_id).copied();
            }
        }
    }

    #[must_use]
    pub fn issues(&self) -> &[SourceIssue] {
        &self.issues
    }

    pub fn issues_mut(&mut self) -> &mut [SourceIssue] {
        &mut self.issues
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<&SourceIssue> {
        self.position(source_id).map(|i| &self.issues[i])
    }

    #[must_use]
    pub fn position(&self, source_id: &str) -> Option<usize> {
        self.index.get(source_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Count resolved and dangling references.
    ///
    /// References to issues outside the batch are logged; the link
    /// rebuilder later reports them as unresolved.
    #[must_use]
    pub fn reference_report(&self) -> ReferenceReport {
        let mut report = ReferenceReport::default();

        for issue in &self.issues {
            if let Some(parent_id) = issue.parent_id.as_deref() {
                if issue.parent_index.is_some() {
                    report.parents_resolved += 1;
                } else {
                    report.parents_dangling += 1;
                    tracing::warn!(key = %issue.key, parent_id, "Parent issue not in batch");
                }
            }

            for link in &issue.links {
                if link.linked_index.is_some() {
                    report.links_resolved += 1;
                } else {
                    report.links_dangling += 1;
                    tracing::warn!(
                        key = %issue.key,
                        linked_id = %link.linked_issue_id,
                        link_type = %link.type_name,
                        "Linked issue not in batch"
                    );
                }
            }
        }

        report
    }
}

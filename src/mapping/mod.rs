//! Field mapping from source issues to target staging records.
//!
//! Each source system has its own tables in [`jira`] and [`youtrack`]. The
//! helpers here cover what both share: the `"<key> <summary>"` title, the
//! authorship banner, attachments and comments.

pub mod jira;
pub mod youtrack;

use crate::model::{
    CorrelationId, SourceIssue, SourceSystem, TargetAttachment, TargetComment, TargetRecord, User,
};

/// Longest title the target accepts.
pub const MAX_TITLE_CHARS: usize = 255;
/// Length an over-long title is cut to before the ellipsis.
pub const CLIPPED_TITLE_CHARS: usize = 240;

/// Build the staging record for one source issue.
///
/// Staged attachment bytes move into the record; the source attachments are
/// left released.
#[must_use]
pub fn map_issue(issue: &mut SourceIssue, correlation_id: CorrelationId) -> TargetRecord {
    let mut record = match issue.system {
        SourceSystem::Jira => jira::map(issue, correlation_id),
        SourceSystem::YouTrack => youtrack::map(issue, correlation_id),
    };
    record.attachments = issue
        .attachments
        .iter_mut()
        .enumerate()
        .map(|(i, a)| TargetAttachment::from_source(i, a))
        .collect();
    record.comments = issue
        .comments
        .iter()
        .map(|c| TargetComment {
            text: c.body.clone(),
            author: c.author.clone(),
            created_at: c.created_at,
        })
        .collect();
    record.tags = issue.labels.clone();
    record.created_by = issue.author.clone();
    record.created_at = issue.created_at;
    record
}

/// `"<key> <summary>"`, clipped to what the target accepts.
#[must_use]
pub fn work_item_title(key: &str, summary: &str) -> String {
    let title = format!("{key} {}", summary.trim());
    if title.chars().count() > MAX_TITLE_CHARS {
        let mut clipped: String = title.chars().take(CLIPPED_TITLE_CHARS).collect();
        clipped.push_str("...");
        clipped
    } else {
        title
    }
}

/// Prepend the original author and creation time to a description.
#[must_use]
pub fn with_author_banner(issue: &SourceIssue, body: &str) -> String {
    let when = issue
        .created_at
        .map(|t| format!(" on {}", t.format("%d.%m.%Y %H:%M")))
        .unwrap_or_default();
    format!(
        "<i>Created by {}{when}:</i><br>{body}",
        mailto(&issue.author)
    )
}

fn mailto(user: &User) -> String {
    format!(
        "<a href='mailto:{}'>{}</a>",
        user.mail_address(),
        user.display_name()
    )
}

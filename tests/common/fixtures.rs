#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ticket_migrate::model::{
    Attachment, Comment, LinkDirection, SourceIssue, SourceLink, SourceSystem, User,
};

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 9, 8, minute, 0).unwrap()
}

pub fn user_x() -> User {
    User::new("acc-x", "Xavier").with_email("x@acme.test")
}

pub fn jira_issue(id: &str, key: &str, summary: &str) -> SourceIssue {
    let mut issue = SourceIssue::new(SourceSystem::Jira, id, key, summary);
    issue.author = User::new("acc-a", "Ann").with_email("ann@acme.test");
    issue.created_at = Some(at(0));
    issue.issue_type = Some("Bug".to_string());
    issue.status = Some("In Progress".to_string());
    issue.priority = Some("Major".to_string());
    issue
}

pub fn youtrack_issue(id: &str, key: &str, summary: &str) -> SourceIssue {
    let mut issue = SourceIssue::new(SourceSystem::YouTrack, id, key, summary);
    issue.author = User::new("1-1", "Rae");
    issue.created_at = Some(at(0));
    issue.issue_type = Some("Task".to_string());
    issue.status = Some("In Progress".to_string());
    issue
}

/// An attachment whose bytes the fake source serves from `content_url`.
pub fn attachment(id: &str, name: &str) -> Attachment {
    Attachment::new(
        id,
        name,
        format!("/rest/api/3/attachment/content/{id}"),
        format!("https://source.test/rest/api/3/attachment/content/{id}"),
    )
}

pub fn comment(id: &str, body: &str, author: User, minute: u32) -> Comment {
    Comment {
        id: id.to_string(),
        body: body.to_string(),
        author,
        created_at: Some(at(minute)),
    }
}

pub fn link(type_name: &str, direction: LinkDirection, other: &str) -> SourceLink {
    SourceLink::new(type_name, direction, other)
}

/// The `ABC-42` issue: one `log.txt` attachment and one comment by X.
pub fn abc_42() -> SourceIssue {
    let mut issue = jira_issue("10042", "ABC-42", "Fix crash");
    issue.description = Some(
        "<p>See <a href=\"/rest/api/3/attachment/content/501\">log.txt</a></p>".to_string(),
    );
    issue.attachments.push(attachment("501", "log.txt"));
    issue.comments.push(comment("c1", "looks good", user_x(), 30));
    issue
}

//! Jira field tables.

use super::{with_author_banner, work_item_title};
use crate::model::{CorrelationId, SourceIssue, TargetRecord};

/// Rich-text custom fields appended to the description, in order.
const SECTIONS: &[(&str, &str)] = &[
    ("expected-actual", "Expected and actual results"),
    ("acceptance-criteria", "Acceptance criteria"),
    ("notes-resources", "Notes/resources"),
    ("screens-figma", "Screens/Figma"),
    ("test-cases", "High-level test cases"),
    ("screens-videos-resources", "Screens/videos/resources"),
];

const STATES: &[(&str, &str)] = &[
    ("Backlog", "Backlog"),
    ("To Do", "To Do"),
    ("In Progress", "In Progress"),
    ("Code Review", "Review"),
    ("Ready for Test", "Ready for test"),
    ("Test", "Testing in Progress"),
    ("Blocked", "In Progress"),
    ("PO Review", "UAT"),
    ("Done", "Done"),
];

const TYPES: &[(&str, &str)] = &[
    ("Epic", "Epic"),
    ("Story", "User Story"),
    ("Bug", "Bug"),
    ("Task", "Task"),
    ("Sub-task", "Task"),
    ("Subtask", "Task"),
];

const PRIORITIES: &[(&str, u8)] = &[
    ("Critical", 1),
    ("Major", 2),
    ("Normal", 3),
    ("Minor", 4),
    ("Undefined", 3),
];

const ACTIVITIES: &[(&str, &str)] = &[
    ("Android", "Development"),
    ("iOS", "Development"),
    ("KMP", "Development"),
    ("Backend", "Development"),
    ("Web", "Development"),
    ("UI/UX", "Design"),
    ("Platform Engineering", "DevOps"),
    ("QA", "Testing"),
];

const DEFAULT_STATE: &str = "New";
const DEFAULT_TYPE: &str = "Task";
const DEFAULT_PRIORITY: u8 = 3;
const DEFAULT_ACTIVITY: &str = "Development";

pub(super) fn lookup<V: Copy>(table: &[(&str, V)], name: &str) -> Option<V> {
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
        .map(|(_, value)| *value)
}

pub(super) fn state(issue: &SourceIssue) -> &'static str {
    let Some(status) = issue.status.as_deref() else {
        return DEFAULT_STATE;
    };
    lookup(STATES, status).unwrap_or_else(|| {
        tracing::warn!(key = %issue.key, status, "Unexpected Jira status");
        DEFAULT_STATE
    })
}

pub(super) fn work_item_type(issue: &SourceIssue) -> &'static str {
    let Some(name) = issue.issue_type.as_deref() else {
        return DEFAULT_TYPE;
    };
    lookup(TYPES, name).unwrap_or_else(|| {
        tracing::warn!(key = %issue.key, issue_type = name, "Unexpected Jira issue type");
        DEFAULT_TYPE
    })
}

pub(super) fn priority(issue: &SourceIssue) -> u8 {
    let Some(name) = issue.priority.as_deref() else {
        return DEFAULT_PRIORITY;
    };
    lookup(PRIORITIES, name).unwrap_or_else(|| {
        tracing::warn!(key = %issue.key, priority = name, "Unexpected priority");
        DEFAULT_PRIORITY
    })
}

/// `None` when a platform is set but unknown.
pub(super) fn activity(issue: &SourceIssue) -> Option<&'static str> {
    let Some(platform) = issue.extra("platform") else {
        return Some(DEFAULT_ACTIVITY);
    };
    let activity = lookup(ACTIVITIES, platform);
    if activity.is_none() {
        tracing::warn!(key = %issue.key, platform, "Unexpected platform");
    }
    activity
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub(super) fn description(issue: &SourceIssue) -> String {
    let mut body = issue.description.clone().unwrap_or_default();
    if let Some(root_cause) = non_blank(issue.extra("root-cause")) {
        body.push_str("<h3>Root cause</h3>");
        body.push_str(root_cause);
        if let Some(detail) = non_blank(issue.extra("root-cause-description")) {
            body.push_str("<br>");
            body.push_str(detail);
        }
    }
    for (field, heading) in SECTIONS {
        if let Some(text) = non_blank(issue.extra(field)) {
            body.push_str("<h3>");
            body.push_str(heading);
            body.push_str("</h3>");
            body.push_str(text);
        }
    }
    body
}

pub(super) fn map(issue: &SourceIssue, correlation_id: CorrelationId) -> TargetRecord {
    let mut record = TargetRecord::new(
        correlation_id,
        &issue.id,
        &issue.key,
        work_item_type(issue),
        work_item_title(&issue.key, &issue.summary),
    );
    record.description = with_author_banner(issue, &description(issue));
    record.steps_to_reproduce = issue.steps_to_reproduce.clone();
    record.state = state(issue).to_string();
    record.blocked = issue
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("Blocked"));
    record.priority = Some(priority(issue));
    record.activity = activity(issue).map(str::to_string);
    record.assigned_to = issue.assignee.clone();
    record.tester = issue.tester.clone();
    record.start_date = issue.start_date;
    record.target_date = issue.due_date;
    record.system_info = issue.extra("devices-versions").map(str::to_string);
    record.found_in = issue.extra("environment").map(str::to_string);
    record
}

//! YouTrack field tables.

use super::jira::lookup;
use super::{with_author_banner, work_item_title};
use crate::model::{CorrelationId, SourceIssue, TargetRecord};

const TYPES: &[(&str, &str)] = &[
    ("Epic", "Epic"),
    ("Feature", "Feature"),
    ("Task", "User Story"),
    ("Bug", "Bug"),
    ("SubTask", "Task"),
];

/// Kanban stage to target state.
const STATES: &[(&str, &str)] = &[
    ("Uncommitted", "New"),
    ("Development Backlog", "Backlog"),
    ("To Do", "To Do"),
    ("In Progress", "In Progress"),
    ("Review", "Review"),
    ("Ready for test", "Ready for test"),
    ("Testing in progress", "Testing in Progress"),
    ("Done", "Done"),
    ("Archived", "Archived"),
    ("Pulled back", "To Do"),
    ("To be released", "Ready for Release"),
    ("UAT", "UAT"),
    ("Could not reproduce", "Done"),
    ("7 Peaks", "Archived"),
];

const UNSTAGED_STATE: &str = "To Do";
const DEFAULT_STATE: &str = "New";
const DEFAULT_TYPE: &str = "Task";
const DEFAULT_PRIORITY: u8 = 3;

pub(super) fn work_item_type(issue: &SourceIssue) -> &'static str {
    let Some(name) = issue.issue_type.as_deref() else {
        return DEFAULT_TYPE;
    };
    lookup(TYPES, name).unwrap_or_else(|| {
        tracing::warn!(key = %issue.key, issue_type = name, "Unexpected YouTrack type");
        DEFAULT_TYPE
    })
}

pub(super) fn state(issue: &SourceIssue) -> &'static str {
    let Some(stage) = issue.status.as_deref() else {
        return UNSTAGED_STATE;
    };
    lookup(STATES, stage).unwrap_or_else(|| {
        tracing::warn!(key = %issue.key, stage, "Unexpected kanban stage");
        DEFAULT_STATE
    })
}

pub(super) fn map(issue: &SourceIssue, correlation_id: CorrelationId) -> TargetRecord {
    let mut record = TargetRecord::new(
        correlation_id,
        &issue.id,
        &issue.key,
        work_item_type(issue),
        work_item_title(&issue.key, &issue.summary),
    );
    record.description = with_author_banner(issue, issue.description.as_deref().unwrap_or_default());
    record.state = state(issue).to_string();
    record.blocked = issue.extra("kanban-state") == Some("Blocked");
    record.priority = Some(DEFAULT_PRIORITY);
    record.assigned_to = issue.assignee.clone();
    record.tester = issue.tester.clone();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CorrelationSequence, SourceSystem};

    fn issue(issue_type: Option<&str>, stage: Option<&str>) -> SourceIssue {
        let mut issue = SourceIssue::new(SourceSystem::YouTrack, "2-1", "DS-1", "Slow export");
        issue.issue_type = issue_type.map(str::to_string);
        issue.status = stage.map(str::to_string);
        issue
    }

    fn record(issue: &SourceIssue) -> TargetRecord {
        map(issue, CorrelationSequence::starting_at(1).next_id())
    }

    #[test]
    fn task_becomes_user_story() {
        assert_eq!(record(&issue(Some("Task"), None)).work_item_type, "User Story");
        assert_eq!(record(&issue(None, None)).work_item_type, "Task");
    }

    #[test]
    fn missing_stage_means_to_do() {
        assert_eq!(record(&issue(None, None)).state, "To Do");
    }

    #[test]
    fn stages_map_to_states() {
        assert_eq!(record(&issue(None, Some("Could not reproduce"))).state, "Done");
        assert_eq!(record(&issue(None, Some("To be released"))).state, "Ready for Release");
        assert_eq!(record(&issue(None, Some("Icebox"))).state, "New");
    }

    #[test]
    fn kanban_state_marks_blocked() {
        let mut blocked = issue(Some("Bug"), Some("In Progress"));
        blocked.extra_fields.insert("kanban-state".to_string(), "Blocked".to_string());
        let record = record(&blocked);
        assert!(record.blocked);
        assert_eq!(record.priority, Some(3));
        assert!(record.activity.is_none());
    }
}

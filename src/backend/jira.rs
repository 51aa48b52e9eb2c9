//! Jira Cloud source client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::SourceBackend;
use super::http::{self, Auth, HttpClient};
use crate::config::{JiraConfig, require};
use crate::error::Result;
use crate::model::{
    Attachment, Comment, LinkDirection, SourceBatch, SourceIssue, SourceLink, SourceSystem, User,
};

const STEPS_FIELD: &str = "customfield_11719";
const QA_ASSIGNEE_FIELD: &str = "customfield_11712";
const START_DATE_FIELD: &str = "customfield_11601";

/// Rendered rich-text custom fields, keyed into `extra_fields`.
const RENDERED_FIELDS: &[(&str, &str)] = &[
    ("customfield_11720", "expected-actual"),
    ("customfield_11696", "acceptance-criteria"),
    ("customfield_11702", "notes-resources"),
    ("customfield_11698", "screens-figma"),
    ("customfield_11988", "test-cases"),
    ("customfield_11721", "screens-videos-resources"),
    ("customfield_11722", "devices-versions"),
];

/// Single-select custom fields (`{"value": ...}`).
const OPTION_FIELDS: &[(&str, &str)] = &[
    ("customfield_11653", "root-cause"),
    ("customfield_11724", "environment"),
    ("customfield_11615", "platform"),
];

/// Plain-text custom fields.
const TEXT_FIELDS: &[(&str, &str)] = &[("customfield_11656", "root-cause-description")];

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    total: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    issues: Vec<IssueDto>,
}

#[derive(Debug, Deserialize)]
struct IssueDto {
    id: String,
    key: String,
    #[serde(default)]
    fields: FieldsDto,
    #[serde(rename = "renderedFields", default, deserialize_with = "null_as_default")]
    rendered: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldsDto {
    summary: Option<String>,
    issuetype: Option<Named>,
    status: Option<Named>,
    priority: Option<Named>,
    creator: Option<UserDto>,
    reporter: Option<UserDto>,
    assignee: Option<UserDto>,
    created: Option<String>,
    duedate: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    labels: Vec<String>,
    parent: Option<IdRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    issuelinks: Vec<LinkDto>,
    #[serde(default, deserialize_with = "null_as_default")]
    attachment: Vec<AttachmentDto>,
    comment: Option<CommentPage>,
    #[serde(flatten)]
    custom: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    #[serde(rename = "accountId", default)]
    account_id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
    #[serde(rename = "emailAddress")]
    email_address: Option<String>,
}

impl From<UserDto> for User {
    fn from(dto: UserDto) -> Self {
        Self {
            id: dto.account_id,
            login: String::new(),
            full_name: dto.display_name,
            email: dto.email_address.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkDto {
    #[serde(rename = "type")]
    link_type: Named,
    #[serde(rename = "inwardIssue")]
    inward: Option<IdRef>,
    #[serde(rename = "outwardIssue")]
    outward: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
struct AttachmentDto {
    id: String,
    filename: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default, deserialize_with = "null_as_default")]
    comments: Vec<CommentDto>,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
    id: String,
    author: Option<UserDto>,
    #[serde(default)]
    body: Value,
    created: Option<String>,
}

/// Parse Jira's timestamp (`2024-02-09T08:05:00.000+0100`) or date-only values.
pub(crate) fn parse_jira_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc())
        })
}

fn rendered_string(rendered: &HashMap<String, Value>, field: &str) -> Option<String> {
    rendered
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn convert_issue(dto: IssueDto) -> SourceIssue {
    let IssueDto {
        id,
        key,
        fields,
        rendered,
    } = dto;
    let mut issue = SourceIssue::new(
        SourceSystem::Jira,
        id,
        key,
        fields.summary.unwrap_or_default(),
    );

    issue.description = rendered_string(&rendered, "description");
    issue.steps_to_reproduce = rendered_string(&rendered, STEPS_FIELD);
    issue.author = fields
        .creator
        .or(fields.reporter)
        .map(User::from)
        .unwrap_or_default();
    issue.created_at = fields.created.as_deref().and_then(parse_jira_time);
    issue.issue_type = fields.issuetype.map(|n| n.name);
    issue.status = fields.status.map(|n| n.name);
    issue.priority = fields.priority.map(|n| n.name);
    issue.assignee = fields.assignee.map(User::from);
    issue.labels = fields.labels.into_iter().collect();
    issue.parent_id = fields.parent.map(|p| p.id);
    issue.due_date = fields.duedate.as_deref().and_then(parse_jira_time);

    let mut custom = fields.custom;
    issue.tester = custom
        .remove(QA_ASSIGNEE_FIELD)
        .filter(Value::is_object)
        .and_then(|v| serde_json::from_value::<UserDto>(v).ok())
        .map(User::from);
    issue.start_date = custom
        .get(START_DATE_FIELD)
        .and_then(Value::as_str)
        .and_then(parse_jira_time);
    for (field, name) in RENDERED_FIELDS {
        if let Some(text) = rendered_string(&rendered, field) {
            issue.extra_fields.insert((*name).to_string(), text);
        }
    }
    for (field, name) in OPTION_FIELDS {
        if let Some(value) = custom.get(*field).and_then(|v| v.get("value")).and_then(Value::as_str) {
            issue.extra_fields.insert((*name).to_string(), value.to_string());
        }
    }
    for (field, name) in TEXT_FIELDS {
        if let Some(value) = custom.get(*field).and_then(Value::as_str) {
            issue.extra_fields.insert((*name).to_string(), value.to_string());
        }
    }

    for link in fields.issuelinks {
        let (direction, other) = match (link.inward, link.outward) {
            (Some(inward), _) => (LinkDirection::Inward, inward),
            (None, Some(outward)) => (LinkDirection::Outward, outward),
            (None, None) => continue,
        };
        issue
            .links
            .push(SourceLink::new(&link.link_type.name, direction, other.id));
    }

    issue.attachments = fields
        .attachment
        .into_iter()
        .map(|a| Attachment::new(a.id, a.filename, a.content.clone(), a.content))
        .collect();

    let rendered_comments = rendered
        .get("comment")
        .and_then(|c| c.get("comments"))
        .and_then(Value::as_array);
    let comments = fields.comment.map(|c| c.comments).unwrap_or_default();
    for (i, comment) in comments.into_iter().enumerate() {
        let body = rendered_comments
            .and_then(|all| all.get(i))
            .and_then(|c| c.get("body"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| comment.body.as_str().map(str::to_string))
            .unwrap_or_default();
        issue.comments.push(Comment {
            id: comment.id,
            body,
            author: comment.author.map(User::from).unwrap_or_default(),
            created_at: comment.created.as_deref().and_then(parse_jira_time),
        });
    }
    issue.sort_comments();
    issue
}

/// Jira project reached with an account email and API token.
#[derive(Debug, Clone)]
pub struct JiraSource {
    http: HttpClient,
    base_url: String,
    jql: String,
    page_size: usize,
}

impl JiraSource {
    /// # Errors
    ///
    /// Fails when base URL, email, token or project is missing.
    pub fn from_config(config: &JiraConfig, timeout: Duration) -> Result<Self> {
        let base_url = require(config.base_url.as_deref(), "jira.base-url")?;
        let email = require(config.email.as_deref(), "jira.email")?;
        let token = require(config.api_token.as_ref(), "jira.api-token")?;
        let project = require(config.project.as_deref(), "jira.project")?;

        let auth = Auth::Basic {
            user: email.to_string(),
            secret: token.clone(),
        };
        Ok(Self {
            http: HttpClient::new(auth, timeout)?,
            base_url: base_url.to_string(),
            jql: build_jql(project, config.query.as_deref()),
            page_size: config.page_size.max(1),
        })
    }
}

fn build_jql(project: &str, query: Option<&str>) -> String {
    match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(extra) => format!("project = \"{project}\" AND ({extra}) ORDER BY created ASC"),
        None => format!("project = \"{project}\" ORDER BY created ASC"),
    }
}

impl SourceBackend for JiraSource {
    fn system(&self) -> SourceSystem {
        SourceSystem::Jira
    }

    fn pull_issues(&self, limit: Option<usize>) -> Result<SourceBatch> {
        let search = http::join(&self.base_url, "rest/api/2/search");
        let mut issues = Vec::new();
        let mut start_at = 0usize;

        loop {
            let wanted = limit.map_or(self.page_size, |l| l.saturating_sub(issues.len()).min(self.page_size));
            if wanted == 0 {
                break;
            }
            let start = start_at.to_string();
            let max = wanted.to_string();
            let url = http::with_query(
                &search,
                &[
                    ("jql", self.jql.as_str()),
                    ("fields", "*all"),
                    ("expand", "renderedFields"),
                    ("startAt", start.as_str()),
                    ("maxResults", max.as_str()),
                ],
            )?;
            let page: SearchPage = self.http.get_json(&url)?;
            let received = page.issues.len();
            tracing::debug!(start_at, received, total = page.total, "Pulled Jira page");

            issues.extend(page.issues.into_iter().map(convert_issue));
            start_at += received;
            // A short page means the end, whatever `total` claims.
            if received < wanted || start_at >= page.total {
                break;
            }
        }

        tracing::info!(count = issues.len(), "Pulled Jira issues");
        Ok(SourceBatch::new(issues))
    }

    fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.http.get_bytes(&attachment.content_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceLinkKind;
    use serde_json::json;

    fn fixture() -> IssueDto {
        serde_json::from_value(json!({
            "id": "10042",
            "key": "ABC-42",
            "fields": {
                "summary": "Fix crash",
                "issuetype": { "name": "Bug" },
                "status": { "name": "Code Review" },
                "priority": { "name": "Major" },
                "creator": { "accountId": "a1", "displayName": "Ann", "emailAddress": "ann@acme.test" },
                "assignee": null,
                "created": "2024-02-09T08:05:00.000+0100",
                "duedate": "2024-03-01",
                "labels": ["mobile", "crash"],
                "parent": { "id": "10001" },
                "issuelinks": [
                    { "type": { "name": "Duplicate" }, "inwardIssue": { "id": "10050" } },
                    { "type": { "name": "Blocks" }, "outwardIssue": { "id": "10051" } }
                ],
                "attachment": [
                    { "id": "900", "filename": "log.txt", "content": "https://acme.atlassian.net/rest/api/3/attachment/content/900" }
                ],
                "comment": { "comments": [
                    { "id": "2", "author": { "accountId": "b", "displayName": "Bo" }, "body": "later", "created": "2024-02-10T10:00:00.000+0000" },
                    { "id": "1", "author": { "accountId": "c", "displayName": "Cy" }, "body": "first", "created": "2024-02-09T10:00:00.000+0000" }
                ]},
                "customfield_11653": { "value": "Code" },
                "customfield_11656": "Null check",
                "customfield_11712": { "accountId": "q", "displayName": "Quinn" },
                "customfield_11601": null
            },
            "renderedFields": {
                "description": "<p>It crashes</p>",
                "customfield_11719": "<ol><li>Open</li></ol>",
                "customfield_11696": "  ",
                "comment": { "comments": [
                    { "body": "<p>later</p>" },
                    { "body": "<p>first</p>" }
                ]}
            }
        }))
        .expect("fixture parses")
    }

    #[test]
    fn converts_core_fields() {
        let issue = convert_issue(fixture());
        assert_eq!(issue.key, "ABC-42");
        assert_eq!(issue.summary, "Fix crash");
        assert_eq!(issue.description.as_deref(), Some("<p>It crashes</p>"));
        assert_eq!(issue.steps_to_reproduce.as_deref(), Some("<ol><li>Open</li></ol>"));
        assert_eq!(issue.status.as_deref(), Some("Code Review"));
        assert_eq!(issue.author.email.as_deref(), Some("ann@acme.test"));
        assert_eq!(issue.parent_id.as_deref(), Some("10001"));
        assert!(issue.labels.contains("crash"));
        assert!(issue.assignee.is_none());
        assert_eq!(issue.tester.as_ref().map(User::display_name), Some("Quinn"));
        assert!(issue.due_date.is_some());
        assert!(issue.start_date.is_none());
    }

    #[test]
    fn converts_custom_fields_and_skips_blank_sections() {
        let issue = convert_issue(fixture());
        assert_eq!(issue.extra("root-cause"), Some("Code"));
        assert_eq!(issue.extra("root-cause-description"), Some("Null check"));
        assert_eq!(issue.extra("acceptance-criteria"), None);
    }

    #[test]
    fn link_direction_follows_endpoint() {
        let issue = convert_issue(fixture());
        assert_eq!(issue.links.len(), 2);
        assert_eq!(issue.links[0].kind, SourceLinkKind::Duplicate);
        assert_eq!(issue.links[0].direction, LinkDirection::Inward);
        assert_eq!(issue.links[0].linked_issue_id, "10050");
        assert_eq!(issue.links[1].direction, LinkDirection::Outward);
    }

    #[test]
    fn comments_use_rendered_bodies_in_time_order() {
        let issue = convert_issue(fixture());
        let bodies: Vec<_> = issue.comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, ["<p>first</p>", "<p>later</p>"]);
    }

    #[test]
    fn attachment_urls_point_at_content() {
        let issue = convert_issue(fixture());
        assert_eq!(issue.attachments[0].id, "900");
        assert_eq!(issue.attachments[0].extension(), "txt");
        assert!(issue.attachments[0].content_url.ends_with("/content/900"));
    }

    #[test]
    fn time_parsing_accepts_jira_formats() {
        let t = parse_jira_time("2024-02-09T08:05:00.000+0100").expect("timestamp");
        assert_eq!(t.to_rfc3339(), "2024-02-09T07:05:00+00:00");
        assert!(parse_jira_time("2024-03-01").is_some());
        assert!(parse_jira_time("soon").is_none());
    }

    #[test]
    fn jql_includes_extra_filter() {
        assert_eq!(build_jql("ABC", None), "project = \"ABC\" ORDER BY created ASC");
        assert_eq!(
            build_jql("ABC", Some("status != Done")),
            "project = \"ABC\" AND (status != Done) ORDER BY created ASC"
        );
    }
}

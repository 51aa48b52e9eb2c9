//! YouTrack source client.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::SourceBackend;
use super::http::{self, Auth, HttpClient};
use crate::config::{YouTrackAuth, YouTrackConfig, require};
use crate::error::Result;
use crate::model::{
    Attachment, Comment, LinkDirection, SourceBatch, SourceIssue, SourceLink, SourceSystem, User,
};

const ISSUE_FIELDS: &str = "id,idReadable,summary,description,wikifiedDescription,created,\
attachments(id,name,url,extension),\
comments(id,author(id,login,fullName,email),created,deleted,textPreview),\
customFields(name,value(id,name,login,fullName)),\
links(direction,linkType(name),issues(id)),\
parent(issues(id)),\
reporter(id,login,fullName,email),\
tags(name)";

const USER_FIELDS: &str = "id,login,fullName,name,email";

#[derive(Debug, Deserialize)]
struct UserDto {
    #[serde(default)]
    id: String,
    #[serde(default)]
    login: String,
    #[serde(rename = "fullName")]
    full_name: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

impl From<UserDto> for User {
    fn from(dto: UserDto) -> Self {
        Self {
            id: dto.id,
            login: dto.login,
            full_name: dto.full_name.or(dto.name).unwrap_or_default(),
            email: dto.email.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueDto {
    id: String,
    #[serde(rename = "idReadable")]
    id_readable: String,
    summary: Option<String>,
    description: Option<String>,
    #[serde(rename = "wikifiedDescription")]
    wikified_description: Option<String>,
    created: Option<i64>,
    #[serde(default)]
    attachments: Option<Vec<AttachmentDto>>,
    #[serde(default)]
    comments: Option<Vec<CommentDto>>,
    #[serde(rename = "customFields", default)]
    custom_fields: Option<Vec<CustomFieldDto>>,
    #[serde(default)]
    links: Option<Vec<LinkDto>>,
    parent: Option<IssueRefs>,
    reporter: Option<UserDto>,
    #[serde(default)]
    tags: Option<Vec<TagDto>>,
}

#[derive(Debug, Deserialize)]
struct AttachmentDto {
    #[serde(default)]
    id: String,
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
    id: String,
    author: Option<UserDto>,
    created: Option<i64>,
    #[serde(default)]
    deleted: bool,
    #[serde(rename = "textPreview")]
    text_preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomFieldDto {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct LinkDto {
    direction: String,
    #[serde(rename = "linkType")]
    link_type: Option<TagDto>,
    #[serde(default)]
    issues: Vec<IdRef>,
}

#[derive(Debug, Deserialize)]
struct IssueRefs {
    #[serde(default)]
    issues: Vec<IdRef>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TagDto {
    name: String,
}

fn millis(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(DateTime::from_timestamp_millis)
}

/// `(name, id)` of a single-value custom field; multi-value fields yield their first entry.
fn field_value(value: &Value) -> Option<(Option<&str>, Option<&str>)> {
    let object = match value {
        Value::Array(values) => values.first()?,
        other => other,
    };
    let object = object.as_object()?;
    Some((
        object.get("name").and_then(Value::as_str),
        object.get("id").and_then(Value::as_str),
    ))
}

fn resolve_user(value: &Value, users: &HashMap<String, User>) -> Option<User> {
    let (name, id) = field_value(value)?;
    let id = id?;
    Some(users.get(id).cloned().unwrap_or_else(|| {
        tracing::debug!(user_id = id, "YouTrack user not in directory");
        User::new(id, name.unwrap_or_default())
    }))
}

fn convert_issue(dto: IssueDto, base_url: &str, users: &HashMap<String, User>) -> SourceIssue {
    let mut issue = SourceIssue::new(
        SourceSystem::YouTrack,
        dto.id,
        dto.id_readable,
        dto.summary.unwrap_or_default(),
    );
    issue.description = dto
        .wikified_description
        .or(dto.description)
        .filter(|d| !d.trim().is_empty());
    issue.author = dto.reporter.map(User::from).unwrap_or_default();
    issue.created_at = millis(dto.created);
    issue.labels = dto.tags.unwrap_or_default().into_iter().map(|t| t.name).collect();
    issue.parent_id = dto
        .parent
        .and_then(|p| p.issues.into_iter().next())
        .map(|p| p.id);

    for field in dto.custom_fields.unwrap_or_default() {
        let name = field_value(&field.value).and_then(|(name, _)| name).map(str::to_string);
        match field.name.as_str() {
            "Type" => issue.issue_type = name,
            "Kanban Stage" => issue.status = name,
            "Priority" => issue.priority = name,
            "Kanban State" => {
                if let Some(state) = name {
                    issue.extra_fields.insert("kanban-state".to_string(), state);
                }
            }
            "Developer" => issue.assignee = resolve_user(&field.value, users),
            "Tester" => issue.tester = resolve_user(&field.value, users),
            _ => {}
        }
    }

    for link in dto.links.unwrap_or_default() {
        let Some(direction) = LinkDirection::parse(&link.direction) else {
            tracing::warn!(key = %issue.key, direction = %link.direction, "Unknown link direction");
            continue;
        };
        let type_name = link.link_type.map(|t| t.name).unwrap_or_default();
        for other in link.issues {
            issue.links.push(SourceLink::new(&type_name, direction, other.id));
        }
    }

    issue.attachments = dto
        .attachments
        .unwrap_or_default()
        .into_iter()
        .map(|a| {
            let content_url = http::join(base_url, &a.url);
            Attachment::new(a.id, a.name, a.url, content_url)
        })
        .collect();

    issue.comments = dto
        .comments
        .unwrap_or_default()
        .into_iter()
        .filter(|c| !c.deleted)
        .map(|c| Comment {
            id: c.id,
            body: c.text_preview.unwrap_or_default(),
            author: c.author.map(User::from).unwrap_or_default(),
            created_at: millis(c.created),
        })
        .collect();
    issue.sort_comments();
    issue
}

/// YouTrack instance reached with a permanent token.
#[derive(Debug, Clone)]
pub struct YouTrackSource {
    http: HttpClient,
    base_url: String,
    query: Option<String>,
    page_size: usize,
    user_page_size: usize,
}

impl YouTrackSource {
    /// # Errors
    ///
    /// Fails when base URL or token is missing, or `basic` auth lacks a login.
    pub fn from_config(config: &YouTrackConfig, timeout: Duration) -> Result<Self> {
        let base_url = require(config.base_url.as_deref(), "youtrack.base-url")?;
        let token = require(config.token.as_ref(), "youtrack.token")?;
        let auth = match config.auth {
            YouTrackAuth::Bearer => Auth::Bearer(token.clone()),
            YouTrackAuth::Basic => Auth::Basic {
                user: require(config.login.as_deref(), "youtrack.login")?.to_string(),
                secret: token.clone(),
            },
        };
        Ok(Self {
            http: HttpClient::new(auth, timeout)?,
            base_url: base_url.to_string(),
            query: config.query.clone(),
            page_size: config.page_size.max(1),
            user_page_size: config.user_page_size.max(1),
        })
    }

    /// Every user, keyed by id, for resolving people-valued custom fields.
    fn pull_users(&self) -> Result<HashMap<String, User>> {
        let endpoint = http::join(&self.base_url, "api/users");
        let top = self.user_page_size.to_string();
        let mut users = HashMap::new();
        let mut skip = 0usize;
        loop {
            let skip_text = skip.to_string();
            let url = http::with_query(
                &endpoint,
                &[("fields", USER_FIELDS), ("$top", top.as_str()), ("$skip", skip_text.as_str())],
            )?;
            let page: Vec<UserDto> = self.http.get_json(&url)?;
            let received = page.len();
            for dto in page {
                users.insert(dto.id.clone(), User::from(dto));
            }
            skip += received;
            if received < self.user_page_size {
                break;
            }
        }
        tracing::debug!(count = users.len(), "Pulled YouTrack users");
        Ok(users)
    }
}

impl SourceBackend for YouTrackSource {
    fn system(&self) -> SourceSystem {
        SourceSystem::YouTrack
    }

    fn pull_issues(&self, limit: Option<usize>) -> Result<SourceBatch> {
        let users = self.pull_users()?;
        let endpoint = http::join(&self.base_url, "api/issues");
        let mut issues = Vec::new();

        loop {
            let wanted = limit.map_or(self.page_size, |l| l.saturating_sub(issues.len()).min(self.page_size));
            if wanted == 0 {
                break;
            }
            let top = wanted.to_string();
            let skip = issues.len().to_string();
            let mut params = vec![("fields", ISSUE_FIELDS), ("$top", top.as_str()), ("$skip", skip.as_str())];
            if let Some(query) = self.query.as_deref() {
                params.push(("query", query));
            }
            let url = http::with_query(&endpoint, &params)?;
            let page: Vec<IssueDto> = self.http.get_json(&url)?;
            let received = page.len();
            tracing::debug!(skip = issues.len(), received, "Pulled YouTrack page");

            issues.extend(page.into_iter().map(|dto| convert_issue(dto, &self.base_url, &users)));
            if received < wanted {
                break;
            }
        }

        tracing::info!(count = issues.len(), "Pulled YouTrack issues");
        Ok(SourceBatch::new(issues))
    }

    fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.http.get_bytes(&attachment.content_url)
    }
}

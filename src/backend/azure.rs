//! Azure DevOps work item tracking client.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

use super::http::{self, Auth, HttpClient, JSON, JSON_PATCH};
use super::{FieldUpdate, Relation, TargetBackend};
use crate::config::{Secret, TargetConfig, require};
use crate::detect::ExistingWorkItem;
use crate::error::Result;
use crate::model::{TargetRecord, User, WorkItemId};

/// WIQL is only served on the stable API version.
const WIQL_API_VERSION: &str = "7.0";
const TITLE_FIELD: &str = "System.Title";
const STATE_FIELD: &str = "System.State";
const TYPE_FIELD: &str = "System.WorkItemType";

/// One JSON-patch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    #[must_use]
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: "add",
            path: path.into(),
            value: value.into(),
        }
    }

    fn field(name: &str, value: impl Into<Value>) -> Self {
        Self::add(format!("/fields/{name}"), value)
    }
}

/// Patch that creates `record`, without its final state.
#[must_use]
pub fn creation_patch(record: &TargetRecord, area_path: &str, tester_field: &str) -> Vec<PatchOperation> {
    let mut ops = vec![
        PatchOperation::field(TITLE_FIELD, record.title.as_str()),
        PatchOperation::field("System.AreaPath", area_path),
        PatchOperation::field("System.Description", record.description.as_str()),
        PatchOperation::field(
            "Microsoft.VSTS.CMMI.Blocked",
            if record.blocked { "Yes" } else { "No" },
        ),
    ];

    if !record.tags.is_empty() {
        ops.push(PatchOperation::field("System.Tags", record.tags_field()));
    }
    if let Some(priority) = record.priority {
        ops.push(PatchOperation::field("Microsoft.VSTS.Common.Priority", priority));
    }
    if let Some(activity) = &record.activity {
        ops.push(PatchOperation::field("Microsoft.VSTS.Common.Activity", activity.as_str()));
    }
    push_user(&mut ops, "System.CreatedBy", Some(&record.created_by));
    if let Some(created) = record.created_at {
        ops.push(PatchOperation::field("System.CreatedDate", created.to_rfc3339()));
    }
    push_user(&mut ops, "System.AssignedTo", record.assigned_to.as_ref());
    push_user(&mut ops, tester_field, record.tester.as_ref());
    if let Some(start) = record.start_date {
        ops.push(PatchOperation::field("Microsoft.VSTS.Scheduling.StartDate", start.to_rfc3339()));
    }
    if let Some(target) = record.target_date {
        ops.push(PatchOperation::field("Microsoft.VSTS.Scheduling.TargetDate", target.to_rfc3339()));
    }
    if let Some(info) = &record.system_info {
        ops.push(PatchOperation::field("Microsoft.VSTS.TCM.SystemInfo", info.as_str()));
    }
    if let Some(found_in) = &record.found_in {
        ops.push(PatchOperation::field("Microsoft.VSTS.CMMI.FoundInEnvironment", found_in.as_str()));
    }
    if let Some(steps) = &record.steps_to_reproduce {
        ops.push(PatchOperation::field(super::fields::REPRO_STEPS, steps.as_str()));
    }
    ops
}

fn push_user(ops: &mut Vec<PatchOperation>, field: &str, user: Option<&User>) {
    if let Some(user) = user.filter(|u| !u.is_anonymous()) {
        ops.push(PatchOperation::field(field, user.mail_address()));
    }
}

/// WIQL selecting live work item ids in `[start, end)`.
#[must_use]
pub fn range_query(project: &str, start: u32, end: u32) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{}' \
         AND [System.IsDeleted] <> true AND [System.Id] >= {start} AND [System.Id] < {end}",
        project.replace('\'', "''")
    )
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    id: WorkItemId,
}

#[derive(Debug, Deserialize)]
struct UploadedAttachment {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<CreatedItem>,
}

#[derive(Debug, Deserialize)]
struct WorkItemList {
    #[serde(default)]
    value: Vec<WorkItemDto>,
}

#[derive(Debug, Deserialize)]
struct WorkItemDto {
    id: WorkItemId,
    #[serde(default)]
    fields: HashMap<String, Value>,
    #[serde(default)]
    relations: Vec<Relation>,
}

impl WorkItemDto {
    fn field(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(Value::as_str).map(str::to_string)
    }

    fn into_existing(self) -> ExistingWorkItem {
        ExistingWorkItem {
            id: self.id,
            title: self.field(TITLE_FIELD).unwrap_or_default(),
            state: self.field(STATE_FIELD),
            work_item_type: self.field(TYPE_FIELD),
        }
    }
}

/// Azure DevOps project reached with a personal access token.
#[derive(Debug, Clone)]
pub struct AzureTarget {
    http: HttpClient,
    project: String,
    project_url: String,
    api_version: String,
    area_path: String,
    tester_field: String,
    bypass_rules: bool,
    id_range_size: u32,
    id_scan_floor: u32,
}

impl AzureTarget {
    /// # Errors
    ///
    /// Fails when organization, project or token is missing, or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &TargetConfig, timeout: Duration) -> Result<Self> {
        let organization = require(config.organization.as_deref(), "target.organization")?;
        let project = require(config.project.as_deref(), "target.project")?;
        let token: &Secret = require(config.token.as_ref(), "target.token")?;

        let auth = Auth::Basic {
            user: String::new(),
            secret: token.clone(),
        };
        let project_url = http::join(
            &config.base_url,
            &format!("{}/{}", encode_segment(organization), encode_segment(project)),
        );
        let area_path = config
            .area_path
            .as_deref()
            .map_or_else(|| project.to_string(), |area| format!("{project}\\{area}"));

        Ok(Self {
            http: HttpClient::new(auth, timeout)?,
            project: project.to_string(),
            project_url,
            api_version: config.api_version.clone(),
            area_path,
            tester_field: config.tester_field.clone(),
            bypass_rules: config.bypass_rules,
            id_range_size: config.id_range_size.max(1),
            id_scan_floor: config.id_scan_floor,
        })
    }

    fn api(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut all = params.to_vec();
        all.push(("api-version", self.api_version.as_str()));
        http::with_query(&http::join(&self.project_url, path), &all)
    }

    fn item_url(&self, id: WorkItemId, params: &[(&str, &str)]) -> Result<String> {
        self.api(&format!("_apis/wit/workitems/{id}"), params)
    }

    fn patch(&self, id: WorkItemId, ops: &[PatchOperation]) -> Result<()> {
        let url = self.item_url(id, &[])?;
        self.http.send_json_unit(Method::PATCH, &url, JSON_PATCH, ops)
    }
}

fn encode_segment(segment: &str) -> String {
    segment.replace(' ', "%20")
}

impl TargetBackend for AzureTarget {
    fn upload_attachment(&self, file_name: &str, content: &[u8]) -> Result<String> {
        let url = self.api("_apis/wit/attachments", &[("fileName", file_name)])?;
        let uploaded: UploadedAttachment = self.http.post_bytes(&url, content)?;
        Ok(uploaded.url)
    }

    fn create_work_item(&self, record: &TargetRecord) -> Result<WorkItemId> {
        let path = format!("_apis/wit/workitems/${}", encode_segment(&record.work_item_type));
        let bypass = self.bypass_rules.to_string();
        let url = self.api(&path, &[("bypassRules", bypass.as_str())])?;
        let ops = creation_patch(record, &self.area_path, &self.tester_field);
        let created: CreatedItem = self.http.send_json(Method::POST, &url, JSON_PATCH, &ops)?;
        Ok(created.id)
    }

    fn update_fields(&self, id: WorkItemId, updates: &[FieldUpdate]) -> Result<()> {
        let ops: Vec<_> = updates
            .iter()
            .map(|u| PatchOperation::field(u.field, u.value.clone()))
            .collect();
        self.patch(id, &ops)
    }

    fn add_relation(&self, id: WorkItemId, rel: &str, url: &str) -> Result<()> {
        let op = PatchOperation::add("/relations/-", json!({ "rel": rel, "url": url }));
        self.patch(id, &[op])
    }

    fn add_comment(&self, id: WorkItemId, text: &str) -> Result<()> {
        let url = self.api(&format!("_apis/wit/workItems/{id}/comments"), &[])?;
        self.http
            .send_json_unit(Method::POST, &url, JSON, &json!({ "text": text }))
    }

    fn relations(&self, id: WorkItemId) -> Result<Vec<Relation>> {
        let url = self.item_url(id, &[("$expand", "relations")])?;
        let item: WorkItemDto = self.http.get_json(&url)?;
        Ok(item.relations)
    }

    fn work_item_url(&self, id: WorkItemId) -> String {
        http::join(&self.project_url, &format!("_apis/wit/workItems/{id}"))
    }

    fn list_work_item_ids(&self) -> Result<Vec<WorkItemId>> {
        let url = http::with_query(
            &http::join(&self.project_url, "_apis/wit/wiql"),
            &[("api-version", WIQL_API_VERSION)],
        )?;
        let mut ids = Vec::new();
        let mut start: u32 = 1;
        loop {
            let end = start.saturating_add(self.id_range_size);
            let query = json!({ "query": range_query(&self.project, start, end) });
            let page: WiqlResponse = self.http.send_json(Method::POST, &url, JSON, &query)?;
            tracing::debug!(start, end, found = page.work_items.len(), "Scanned id range");

            // Ids are sparse; keep scanning empty ranges until past the floor.
            if page.work_items.is_empty() && start > self.id_scan_floor {
                break;
            }
            ids.extend(page.work_items.into_iter().map(|w| w.id));
            if end == u32::MAX {
                break;
            }
            start = end;
        }
        Ok(ids)
    }

    fn fetch_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<ExistingWorkItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let field_list = [TITLE_FIELD, STATE_FIELD, TYPE_FIELD].join(",");
        let url = self.api(
            "_apis/wit/workitems",
            &[("ids", id_list.as_str()), ("fields", field_list.as_str())],
        )?;
        let list: WorkItemList = self.http.get_json(&url)?;
        if list.value.len() != ids.len() {
            tracing::warn!(requested = ids.len(), returned = list.value.len(), "Work item fetch returned a short batch");
        }
        Ok(list.value.into_iter().map(WorkItemDto::into_existing).collect())
    }

    fn delete_work_item(&self, id: WorkItemId) -> Result<()> {
        let url = self.item_url(id, &[("destroy", "true")])?;
        self.http.delete(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::model::CorrelationSequence;
    use chrono::{TimeZone, Utc};

    fn record() -> TargetRecord {
        let mut record = TargetRecord::new(
            CorrelationSequence::starting_at(5).next_id(),
            "10042",
            "ABC-42",
            "Bug",
            "ABC-42 Fix crash",
        );
        record.description = "<p>body</p>".to_string();
        record.created_by = User::new("acc", "Ann").with_email("ann@acme.test");
        record.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        record.priority = Some(2);
        record.tags.insert("mobile".to_string());
        record.state = "Done".to_string();
        record
    }

    fn paths(ops: &[PatchOperation]) -> Vec<&str> {
        ops.iter().map(|op| op.path.as_str()).collect()
    }

    #[test]
    fn creation_patch_never_sets_state() {
        let ops = creation_patch(&record(), "Proj\\Mobile", "Custom.Tester");
        assert!(!paths(&ops).contains(&"/fields/System.State"));
        assert!(ops.iter().all(|op| op.op == "add"));
    }

    #[test]
    fn creation_patch_carries_core_fields() {
        let ops = creation_patch(&record(), "Proj\\Mobile", "Custom.Tester");
        let by_path: HashMap<_, _> = ops.iter().map(|op| (op.path.as_str(), &op.value)).collect();
        assert_eq!(by_path["/fields/System.Title"], &json!("ABC-42 Fix crash"));
        assert_eq!(by_path["/fields/System.AreaPath"], &json!("Proj\\Mobile"));
        assert_eq!(by_path["/fields/System.Tags"], &json!("mobile"));
        assert_eq!(by_path["/fields/Microsoft.VSTS.Common.Priority"], &json!(2));
        assert_eq!(by_path["/fields/Microsoft.VSTS.CMMI.Blocked"], &json!("No"));
        assert_eq!(by_path["/fields/System.CreatedBy"], &json!("ann@acme.test"));
        assert_eq!(by_path["/fields/System.CreatedDate"], &json!("2024-01-02T03:04:05+00:00"));
    }

    #[test]
    fn creation_patch_skips_absent_users() {
        let ops = creation_patch(&record(), "Proj", "Custom.Tester");
        let paths = paths(&ops);
        assert!(!paths.contains(&"/fields/System.AssignedTo"));
        assert!(!paths.contains(&"/fields/Custom.Tester"));
    }

    #[test]
    fn range_query_escapes_project() {
        let wiql = range_query("O'Brien", 1, 10001);
        assert!(wiql.contains("[System.TeamProject] = 'O''Brien'"));
        assert!(wiql.contains("[System.Id] >= 1 AND [System.Id] < 10001"));
    }

    #[test]
    fn work_item_dto_reads_fields() {
        let dto: WorkItemDto = serde_json::from_value(json!({
            "id": 1201,
            "fields": { "System.Title": "ABC-1 Hello", "System.State": "New" },
            "relations": [{ "rel": "AttachedFile", "url": "https://x", "attributes": {} }]
        }))
        .unwrap();
        assert_eq!(dto.relations.len(), 1);
        let item = dto.into_existing();
        assert_eq!(item.title, "ABC-1 Hello");
        assert_eq!(item.state.as_deref(), Some("New"));
        assert_eq!(item.work_item_type, None);
    }

    fn target_config(token: Option<Secret>) -> TargetConfig {
        TargetConfig {
            base_url: "https://dev.azure.com".to_string(),
            organization: Some("acme".to_string()),
            project: Some("Proj".to_string()),
            token,
            api_version: "7.1-preview.3".to_string(),
            area_path: None,
            id_range_size: 10_000,
            id_scan_floor: 100_000,
            fetch_batch_size: 50,
            check_existing_links: true,
            bypass_rules: true,
            tester_field: "Custom.Tester".to_string(),
        }
    }

    #[test]
    fn missing_token_is_reported() {
        let err = AzureTarget::from_config(&target_config(None), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, MigrateError::MissingConfig { key } if key == "target.token"));
    }

    #[test]
    fn zero_id_range_still_advances() {
        let config = TargetConfig {
            id_range_size: 0,
            ..target_config(Some(Secret::new("pat")))
        };
        let target = AzureTarget::from_config(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(target.id_range_size, 1);
    }
}

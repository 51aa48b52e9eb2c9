#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};

use ticket_migrate::MigrateError;
use ticket_migrate::backend::{FieldUpdate, Relation, SourceBackend, TargetBackend, fields};
use ticket_migrate::detect::ExistingWorkItem;
use ticket_migrate::error::Result;
use ticket_migrate::model::{
    Attachment, SourceBatch, SourceIssue, SourceSystem, TargetRecord, WorkItemId,
};

pub const BASE: &str = "https://target.test/acme/proj";

fn injected(method: &str, url: impl Into<String>) -> MigrateError {
    MigrateError::Http {
        method: method.to_string(),
        url: url.into(),
        status: 500,
        body: "injected failure".to_string(),
    }
}

/// A work item as the fake target stores it.
#[derive(Debug, Clone, Default)]
pub struct FakeItem {
    pub title: String,
    pub work_item_type: String,
    pub state: String,
    pub description: String,
    pub repro_steps: Option<String>,
    pub relations: Vec<Relation>,
    pub comments: Vec<String>,
}

/// In-memory target recording every call, with switchable faults.
#[derive(Debug, Default)]
pub struct FakeTarget {
    pub items: RefCell<BTreeMap<WorkItemId, FakeItem>>,
    pub uploads: RefCell<Vec<(String, Vec<u8>)>>,
    pub calls: RefCell<Vec<String>>,
    next_id: Cell<WorkItemId>,

    /// Creation fails for titles starting with any of these.
    pub fail_create: RefCell<HashSet<String>>,
    /// Uploads fail for these generated file names.
    pub fail_upload: RefCell<HashSet<String>>,
    pub fail_state: Cell<bool>,
    pub fail_comments: Cell<bool>,
    pub fail_relations_query: Cell<bool>,
    /// `add_relation` fails for relations of this reference name.
    pub fail_relation_kind: RefCell<Option<String>>,
    /// `delete_work_item` fails for these ids.
    pub fail_delete: RefCell<HashSet<WorkItemId>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        let target = Self::default();
        target.next_id.set(100);
        target
    }

    /// Pre-populate an item, as if migrated by an earlier run.
    pub fn seed(&self, title: &str) -> WorkItemId {
        let id = self.allocate();
        self.items.borrow_mut().insert(
            id,
            FakeItem {
                title: title.to_string(),
                work_item_type: "Task".to_string(),
                state: "New".to_string(),
                ..FakeItem::default()
            },
        );
        id
    }

    pub fn fail_create_for(&self, title_prefix: &str) {
        self.fail_create.borrow_mut().insert(title_prefix.to_string());
    }

    pub fn item(&self, id: WorkItemId) -> FakeItem {
        self.items.borrow().get(&id).cloned().unwrap_or_default()
    }

    pub fn item_by_key(&self, key: &str) -> Option<(WorkItemId, FakeItem)> {
        self.items
            .borrow()
            .iter()
            .find(|(_, item)| item.title.split_whitespace().next() == Some(key))
            .map(|(id, item)| (*id, item.clone()))
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(name)).count()
    }

    /// Non-attachment relations across every item: `(from, rel, to)`.
    pub fn links(&self) -> Vec<(WorkItemId, String, WorkItemId)> {
        let mut links = Vec::new();
        for (id, item) in self.items.borrow().iter() {
            for relation in &item.relations {
                if let Some(to) = relation.url.strip_prefix(&format!("{BASE}/_apis/wit/workItems/")) {
                    links.push((*id, relation.rel.clone(), to.parse().unwrap()));
                }
            }
        }
        links
    }

    fn allocate(&self) -> WorkItemId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn missing(id: WorkItemId) -> MigrateError {
        MigrateError::Http {
            method: "PATCH".to_string(),
            url: format!("{BASE}/_apis/wit/workitems/{id}"),
            status: 404,
            body: "no such work item".to_string(),
        }
    }
}

impl TargetBackend for FakeTarget {
    fn upload_attachment(&self, file_name: &str, content: &[u8]) -> Result<String> {
        self.record(format!("upload {file_name}"));
        if self.fail_upload.borrow().contains(file_name) {
            return Err(injected("POST", format!("{BASE}/_apis/wit/attachments?fileName={file_name}")));
        }
        let mut uploads = self.uploads.borrow_mut();
        uploads.push((file_name.to_string(), content.to_vec()));
        Ok(format!("{BASE}/_apis/wit/attachments/guid-{}", uploads.len()))
    }

    fn create_work_item(&self, record: &TargetRecord) -> Result<WorkItemId> {
        self.record(format!("create {}", record.title));
        if self.fail_create.borrow().iter().any(|p| record.title.starts_with(p.as_str())) {
            return Err(injected("POST", format!("{BASE}/_apis/wit/workitems/${}", record.work_item_type)));
        }
        let id = self.allocate();
        self.items.borrow_mut().insert(
            id,
            FakeItem {
                title: record.title.clone(),
                work_item_type: record.work_item_type.clone(),
                state: "New".to_string(),
                description: record.description.clone(),
                repro_steps: record.steps_to_reproduce.clone(),
                ..FakeItem::default()
            },
        );
        Ok(id)
    }

    fn update_fields(&self, id: WorkItemId, updates: &[FieldUpdate]) -> Result<()> {
        let names: Vec<_> = updates.iter().map(|u| u.field).collect();
        self.record(format!("update {id} {}", names.join(",")));
        if self.fail_state.get() && names.contains(&fields::STATE) {
            return Err(injected("PATCH", format!("{BASE}/_apis/wit/workitems/{id}")));
        }
        let mut items = self.items.borrow_mut();
        let item = items.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        for update in updates {
            let text = update.value.as_str().map(str::to_string);
            match update.field {
                fields::STATE => item.state = text.unwrap_or_default(),
                fields::DESCRIPTION => item.description = text.unwrap_or_default(),
                fields::REPRO_STEPS => item.repro_steps = text,
                _ => {}
            }
        }
        Ok(())
    }

    fn add_relation(&self, id: WorkItemId, rel: &str, url: &str) -> Result<()> {
        self.record(format!("relate {id} {rel} {url}"));
        if self.fail_relation_kind.borrow().as_deref() == Some(rel) {
            return Err(injected("PATCH", format!("{BASE}/_apis/wit/workitems/{id}")));
        }
        let mut items = self.items.borrow_mut();
        let item = items.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        item.relations.push(Relation {
            rel: rel.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    fn add_comment(&self, id: WorkItemId, text: &str) -> Result<()> {
        self.record(format!("comment {id}"));
        if self.fail_comments.get() {
            return Err(injected("POST", format!("{BASE}/_apis/wit/workItems/{id}/comments")));
        }
        let mut items = self.items.borrow_mut();
        let item = items.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        item.comments.push(text.to_string());
        Ok(())
    }

    fn relations(&self, id: WorkItemId) -> Result<Vec<Relation>> {
        self.record(format!("relations {id}"));
        if self.fail_relations_query.get() {
            return Err(injected("GET", format!("{BASE}/_apis/wit/workitems/{id}?$expand=relations")));
        }
        Ok(self.item(id).relations)
    }

    fn work_item_url(&self, id: WorkItemId) -> String {
        format!("{BASE}/_apis/wit/workItems/{id}")
    }

    fn list_work_item_ids(&self) -> Result<Vec<WorkItemId>> {
        self.record("list".to_string());
        Ok(self.items.borrow().keys().copied().collect())
    }

    fn fetch_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<ExistingWorkItem>> {
        self.record(format!("fetch {}", ids.len()));
        let items = self.items.borrow();
        Ok(ids
            .iter()
            .filter_map(|id| {
                items.get(id).map(|item| ExistingWorkItem {
                    id: *id,
                    title: item.title.clone(),
                    state: Some(item.state.clone()),
                    work_item_type: Some(item.work_item_type.clone()),
                })
            })
            .collect())
    }

    fn delete_work_item(&self, id: WorkItemId) -> Result<()> {
        self.record(format!("delete {id}"));
        if self.fail_delete.borrow().contains(&id) {
            return Err(injected("DELETE", format!("{BASE}/_apis/wit/workitems/{id}?destroy=true")));
        }
        self.items.borrow_mut().remove(&id).map(|_| ()).ok_or_else(|| Self::missing(id))
    }
}

/// In-memory source serving a fixed list of issues.
#[derive(Debug)]
pub struct FakeSource {
    pub system: SourceSystem,
    pub issues: Vec<SourceIssue>,
    /// Attachment bytes by content URL.
    pub blobs: HashMap<String, Vec<u8>>,
}

impl FakeSource {
    pub fn new(system: SourceSystem, issues: Vec<SourceIssue>) -> Self {
        let blobs = issues
            .iter()
            .flat_map(|i| i.attachments.iter())
            .map(|a| (a.content_url.clone(), format!("bytes of {}", a.file_name).into_bytes()))
            .collect();
        Self {
            system,
            issues,
            blobs,
        }
    }

    pub fn with_blob(mut self, content_url: &str, bytes: &[u8]) -> Self {
        self.blobs.insert(content_url.to_string(), bytes.to_vec());
        self
    }

    pub fn without_blob(mut self, content_url: &str) -> Self {
        self.blobs.remove(content_url);
        self
    }
}

impl SourceBackend for FakeSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    fn pull_issues(&self, limit: Option<usize>) -> Result<SourceBatch> {
        let take = limit.unwrap_or(usize::MAX);
        Ok(SourceBatch::new(self.issues.iter().take(take).cloned().collect()))
    }

    fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.blobs
            .get(&attachment.content_url)
            .cloned()
            .ok_or_else(|| MigrateError::Http {
                method: "GET".to_string(),
                url: attachment.content_url.clone(),
                status: 404,
                body: String::new(),
            })
    }
}

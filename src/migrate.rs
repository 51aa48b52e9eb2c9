//! Batch driver.
//!
//! Migration runs in two stages with an explicit hand-off:
//!
//! 1. [`stage1`] walks the batch in pull order. Items already in the target
//!    are registered in the identity map; the rest are staged, mapped and
//!    pushed through the per-item pipeline.
//! 2. [`stage2`] takes the identity map stage 1 produced and rebuilds parent
//!    pointers and links.
//!
//! Stage 2 needs every work item of the batch to exist, so it only accepts
//! the [`BatchPush`] that stage 1 returns.

use serde::Serialize;
use std::fmt;

use crate::backend::{SourceBackend, TargetBackend, pull_existing_items};
use crate::detect::{ExistingItemIndex, KeyMatchMode};
use crate::error::Result;
use crate::identity::IdentityMap;
use crate::links::{LinkPushReport, apply_parents, plan_links, push_links};
use crate::mapping::map_issue;
use crate::model::{CorrelationSequence, SourceBatch, SourceSystem, TargetRecord, WorkItemId};
use crate::pipeline::{ItemOutcome, Step, push_item, stage_attachments};

/// Knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub key_match: KeyMatchMode,
    pub check_existing_links: bool,
    pub fetch_batch_size: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            limit: None,
            dry_run: false,
            key_match: KeyMatchMode::default(),
            check_existing_links: true,
            fetch_batch_size: 50,
        }
    }
}

/// What stage 1 did with one source issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    /// Found in the target; nothing pushed.
    Existing { work_item: WorkItemId },
    /// Dry run: would have been pushed.
    WouldCreate,
    Pushed(ItemOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub source_key: String,
    pub source_id: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

/// Output of [`stage1`], the only input [`stage2`] accepts.
#[derive(Debug, Default)]
pub struct BatchPush {
    pub identity: IdentityMap,
    /// Records of the items pushed in this run, in pull order.
    pub records: Vec<TargetRecord>,
    pub items: Vec<ItemReport>,
}

/// Detect, stage, map and push every issue of `batch`, one at a time.
///
/// A failing item never stops the loop.
pub fn stage1(
    source: &dyn SourceBackend,
    target: &dyn TargetBackend,
    batch: &mut SourceBatch,
    existing: &ExistingItemIndex,
    sequence: &mut CorrelationSequence,
    dry_run: bool,
) -> BatchPush {
    let mut push = BatchPush::default();

    for issue in batch.issues_mut() {
        let status = if let Some(found) = existing.detect(issue, &mut push.identity) {
            tracing::info!(key = %issue.key, work_item = found.id, "Already migrated");
            ItemStatus::Existing { work_item: found.id }
        } else if dry_run {
            tracing::info!(key = %issue.key, attachments = issue.attachments.len(), "Would create");
            ItemStatus::WouldCreate
        } else {
            let fetch_failures = stage_attachments(source, issue);
            let mut record = map_issue(issue, sequence.next_id());
            let mut outcome = push_item(target, issue, &mut record, &mut push.identity);
            if !fetch_failures.is_empty() {
                outcome.failures.splice(0..0, fetch_failures);
            }
            push.records.push(record);
            ItemStatus::Pushed(outcome)
        };
        push.items.push(ItemReport {
            source_key: issue.key.clone(),
            source_id: issue.id.clone(),
            status,
        });
    }

    push
}

/// Resolve parents and push links for a batch `stage1` finished.
pub fn stage2(
    target: &dyn TargetBackend,
    batch: &SourceBatch,
    push: &mut BatchPush,
    check_existing_links: bool,
) -> LinkPushReport {
    let plan = plan_links(batch, &push.identity);
    let parents = apply_parents(&mut push.records, &plan);
    tracing::debug!(parents, "Applied parent pointers");
    push_links(target, &plan, check_existing_links)
}

/// End-of-run counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub system: Option<SourceSystem>,
    pub pulled: usize,
    pub existing: usize,
    pub created: usize,
    pub creation_failed: usize,
    pub would_create: usize,
    /// Created items that hit at least one non-fatal failure.
    pub partial: usize,
    pub links_pushed: usize,
    pub links_present: usize,
    pub link_failures: usize,
    pub links_unresolved: usize,
}

impl MigrationSummary {
    #[must_use]
    pub fn from_run(system: SourceSystem, push: &BatchPush, links: Option<&LinkPushReport>) -> Self {
        let mut summary = Self {
            system: Some(system),
            pulled: push.items.len(),
            ..Self::default()
        };
        for item in &push.items {
            match &item.status {
                ItemStatus::Existing { .. } => summary.existing += 1,
                ItemStatus::WouldCreate => summary.would_create += 1,
                ItemStatus::Pushed(outcome) if outcome.is_created() => {
                    summary.created += 1;
                    if !outcome.failures.is_empty() {
                        summary.partial += 1;
                    }
                }
                ItemStatus::Pushed(_) => summary.creation_failed += 1,
            }
        }
        if let Some(links) = links {
            summary.links_pushed = links.pushed;
            summary.links_present = links.already_present;
            summary.link_failures = links.failures.iter().filter(|f| f.step == Step::LinkPush).count();
            summary.links_unresolved = links.unresolved;
        }
        summary
    }

    pub fn log(&self) {
        tracing::info!(
            pulled = self.pulled,
            existing = self.existing,
            created = self.created,
            creation_failed = self.creation_failed,
            partial = self.partial,
            links_pushed = self.links_pushed,
            link_failures = self.link_failures,
            "Migration finished"
        );
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let system = self.system.map_or("source", SourceSystem::as_str);
        writeln!(f, "Pulled {} {system} issues", self.pulled)?;
        writeln!(f, "  already migrated: {}", self.existing)?;
        if self.would_create > 0 {
            writeln!(f, "  would create:     {}", self.would_create)?;
        }
        writeln!(f, "  created:          {} ({} with failures)", self.created, self.partial)?;
        writeln!(f, "  creation failed:  {}", self.creation_failed)?;
        write!(
            f,
            "Links: {} pushed, {} already present, {} failed, {} unresolved",
            self.links_pushed, self.links_present, self.link_failures, self.links_unresolved
        )
    }
}

/// Everything a full run produced.
#[derive(Debug)]
pub struct MigrationRun {
    pub batch: SourceBatch,
    pub push: BatchPush,
    pub links: Option<LinkPushReport>,
    pub summary: MigrationSummary,
}

/// Pull, push and link one source system's batch.
///
/// # Errors
///
/// Fails only when the source batch or the target's existing items cannot be
/// listed; per-item and per-link failures are reported in the result.
pub fn run(
    source: &dyn SourceBackend,
    target: &dyn TargetBackend,
    options: &MigrationOptions,
    sequence: &mut CorrelationSequence,
) -> Result<MigrationRun> {
    let system = source.system();
    tracing::info!(%system, limit = ?options.limit, dry_run = options.dry_run, "Starting migration");

    let mut batch = source.pull_issues(options.limit)?;
    let references = batch.reference_report();
    tracing::debug!(?references, "Resolved source references");

    let existing = ExistingItemIndex::new(
        pull_existing_items(target, options.fetch_batch_size)?,
        options.key_match,
    );

    let mut push = stage1(source, target, &mut batch, &existing, sequence, options.dry_run);
    let links = if options.dry_run {
        let plan = plan_links(&batch, &push.identity);
        tracing::info!(links = plan.links.len(), "Dry run; links not pushed");
        None
    } else {
        Some(stage2(target, &batch, &mut push, options.check_existing_links))
    };

    let summary = MigrationSummary::from_run(system, &push, links.as_ref());
    summary.log();
    Ok(MigrationRun {
        batch,
        push,
        links,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PhaseFailure, PipelinePhase};

    fn pushed(work_item: Option<WorkItemId>, failures: Vec<PhaseFailure>) -> ItemStatus {
        ItemStatus::Pushed(ItemOutcome {
            correlation_id: CorrelationSequence::starting_at(1).next_id(),
            source_id: "1".to_string(),
            source_key: "A-1".to_string(),
            work_item,
            reached: if work_item.is_some() { PipelinePhase::Done } else { PipelinePhase::AttachmentsUploaded },
            failures,
        })
    }

    fn report(status: ItemStatus) -> ItemReport {
        ItemReport {
            source_key: "A-1".to_string(),
            source_id: "1".to_string(),
            status,
        }
    }

    #[test]
    fn summary_counts_each_status() {
        let push = BatchPush {
            items: vec![
                report(ItemStatus::Existing { work_item: 7 }),
                report(pushed(Some(8), Vec::new())),
                report(pushed(Some(9), vec![PhaseFailure::new(Step::CommentPush, "comment #0", "HTTP 500")])),
                report(pushed(None, vec![PhaseFailure::new(Step::Creation, "A-1 x", "HTTP 400")])),
            ],
            ..BatchPush::default()
        };
        let links = LinkPushReport {
            pushed: 2,
            unresolved: 1,
            failures: vec![PhaseFailure::new(Step::LinkGuard, "8 -> 9 (related)", "timeout")],
            ..LinkPushReport::default()
        };
        let summary = MigrationSummary::from_run(SourceSystem::Jira, &push, Some(&links));
        assert_eq!(summary.pulled, 4);
        assert_eq!(summary.existing, 1);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.creation_failed, 1);
        assert_eq!(summary.links_pushed, 2);
        assert_eq!(summary.link_failures, 0);
        assert_eq!(summary.links_unresolved, 1);
    }

    #[test]
    fn item_report_serializes_flat() {
        let value = serde_json::to_value(report(ItemStatus::Existing { work_item: 7 })).unwrap();
        assert_eq!(value["status"], "existing");
        assert_eq!(value["work_item"], 7);
        assert_eq!(value["source_key"], "A-1");
    }

    #[test]
    fn pushed_item_report_names_the_source_once() {
        let json = serde_json::to_string(&report(pushed(Some(5), Vec::new()))).unwrap();
        assert_eq!(json.matches("\"source_key\"").count(), 1, "{json}");
        assert_eq!(json.matches("\"source_id\"").count(), 1, "{json}");

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "pushed");
        assert_eq!(value["work_item"], 5);
        assert_eq!(value["source_key"], "A-1");
    }
}

//! Link rebuilding.
//!
//! Runs once every item of the batch has been created (or has failed for
//! good). Parent pointers and source links are resolved through the
//! [`IdentityMap`], translated into target relations through a static table,
//! and pushed one call at a time.
//!
//! Each logical relation produces exactly one edge. A link seen from its
//! origin (`Inward`) keeps its orientation, the mirrored view (`Outward`) is
//! flipped back onto the origin, and symmetric relations are anchored on the
//! endpoint with the smaller source id. Identical edges are then collapsed, so
//! a relation listed on both endpoints is still pushed once.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::backend::{TargetBackend, work_item_id_from_url};
use crate::identity::IdentityMap;
use crate::model::{
    LinkDirection, RelationType, SourceBatch, SourceIssue, SourceLink, SourceLinkKind, SourceSystem,
    TargetRecord, WorkItemId,
};
use crate::pipeline::{PhaseFailure, Step};

use LinkDirection::{Both, Inward, Outward};
use Orientation::{Forward, Reverse, Symmetric};
use RelationType::{DependsOn, Duplicate, Hierarchy, Related};
use SourceLinkKind as K;
use SourceSystem::{Jira, YouTrack};

/// How a translated link is oriented relative to the issue that lists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// From the listing issue to the linked issue.
    Forward,
    /// From the linked issue back to the listing issue.
    Reverse,
    /// Either way; anchored on the smaller source id.
    Symmetric,
}

/// One row of the translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRule {
    pub system: SourceSystem,
    pub kind: SourceLinkKind,
    pub direction: LinkDirection,
    pub relation: RelationType,
    pub orientation: Orientation,
}

const fn rule(
    system: SourceSystem,
    kind: SourceLinkKind,
    direction: LinkDirection,
    relation: RelationType,
    orientation: Orientation,
) -> LinkRule {
    LinkRule {
        system,
        kind,
        direction,
        relation,
        orientation,
    }
}

/// Source link type and direction to target relation.
pub const RELATION_TABLE: &[LinkRule] = &[
    rule(YouTrack, K::Relates, Both, Related, Symmetric),
    rule(YouTrack, K::Relates, Inward, Related, Symmetric),
    rule(YouTrack, K::Relates, Outward, Related, Symmetric),
    rule(YouTrack, K::Depends, Inward, DependsOn, Forward),
    rule(YouTrack, K::Depends, Outward, DependsOn, Reverse),
    rule(YouTrack, K::Duplicate, Inward, Duplicate, Forward),
    rule(YouTrack, K::Duplicate, Outward, Duplicate, Reverse),
    rule(YouTrack, K::Subtask, Inward, Hierarchy, Forward),
    rule(YouTrack, K::Subtask, Outward, Hierarchy, Reverse),
    rule(Jira, K::Relates, Inward, Related, Symmetric),
    rule(Jira, K::Relates, Outward, Related, Symmetric),
    rule(Jira, K::Blocks, Inward, Related, Symmetric),
    rule(Jira, K::Blocks, Outward, Related, Symmetric),
    rule(Jira, K::Causes, Inward, Related, Symmetric),
    rule(Jira, K::Causes, Outward, Related, Symmetric),
    rule(Jira, K::Clones, Inward, Duplicate, Forward),
    rule(Jira, K::Clones, Outward, Duplicate, Reverse),
    rule(Jira, K::Duplicate, Inward, Duplicate, Forward),
    rule(Jira, K::Duplicate, Outward, Duplicate, Reverse),
    rule(Jira, K::Depends, Inward, DependsOn, Forward),
    rule(Jira, K::Depends, Outward, DependsOn, Reverse),
];

/// Unclassified links degrade to a plain relation.
const FALLBACK: (RelationType, Orientation) = (Related, Symmetric);

/// Translate one source link; `None` means the table has no row for it.
#[must_use]
pub fn lookup(system: SourceSystem, kind: SourceLinkKind, direction: LinkDirection) -> Option<(RelationType, Orientation)> {
    RELATION_TABLE
        .iter()
        .find(|r| r.system == system && r.kind == kind && r.direction == direction)
        .map(|r| (r.relation, r.orientation))
}

/// Like [`lookup`], falling back to a symmetric related link with a warning.
#[must_use]
pub fn translate(issue: &SourceIssue, link: &SourceLink) -> (RelationType, Orientation) {
    lookup(issue.system, link.kind, link.direction).unwrap_or_else(|| {
        tracing::warn!(
            key = %issue.key,
            link_type = %link.type_name,
            direction = ?link.direction,
            "Unexpected link type; pushing as related"
        );
        FALLBACK
    })
}

/// Why a planned edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOrigin {
    Parent,
    Link,
}

/// One relation to push, both ends resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLink {
    pub from_source: String,
    pub to_source: String,
    pub from: WorkItemId,
    pub to: WorkItemId,
    pub relation: RelationType,
    pub origin: LinkOrigin,
}

impl fmt::Display for PlannedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.relation)
    }
}

/// A parent pointer resolved to target ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentAssignment {
    pub child_source: String,
    pub child: WorkItemId,
    pub parent: WorkItemId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The referenced issue was not part of the pull.
    NotInBatch,
    /// The issue carrying the reference has no work item.
    SourceNotMigrated,
    /// The referenced issue has no work item.
    TargetNotMigrated,
}

/// A reference the rebuilder had to skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedLink {
    pub source_key: String,
    pub linked_source_id: String,
    pub origin: LinkOrigin,
    pub reason: UnresolvedReason,
}

/// Everything stage two will do, computed without network calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkPlan {
    pub links: Vec<PlannedLink>,
    pub parents: Vec<ParentAssignment>,
    pub unresolved: Vec<UnresolvedLink>,
}

#[derive(Default)]
struct Planner {
    plan: LinkPlan,
    seen: BTreeSet<(WorkItemId, WorkItemId, RelationType)>,
}

impl Planner {
    fn add(&mut self, link: PlannedLink) {
        if self.seen.insert((link.from, link.to, link.relation)) {
            self.plan.links.push(link);
        } else {
            tracing::debug!(%link, "Relation already planned from the other endpoint");
        }
    }

    fn unresolved(&mut self, issue: &SourceIssue, linked: &str, origin: LinkOrigin, reason: UnresolvedReason) {
        tracing::warn!(
            key = %issue.key,
            linked_source_id = linked,
            ?origin,
            ?reason,
            "Skipping unresolved reference"
        );
        self.plan.unresolved.push(UnresolvedLink {
            source_key: issue.key.clone(),
            linked_source_id: linked.to_string(),
            origin,
            reason,
        });
    }

    /// Resolve both endpoints or record why not.
    ///
    /// `position` is the batch index recorded on the reference when the
    /// batch was built; `None` means the linked issue was not pulled.
    fn endpoints(
        &mut self,
        batch: &SourceBatch,
        identity: &IdentityMap,
        issue: &SourceIssue,
        (linked, position): (&str, Option<usize>),
        origin: LinkOrigin,
    ) -> Option<(WorkItemId, WorkItemId)> {
        let Some(linked_issue) = position.and_then(|i| batch.issues().get(i)) else {
            self.unresolved(issue, linked, origin, UnresolvedReason::NotInBatch);
            return None;
        };
        let Some(own) = identity.target_for(&issue.id) else {
            self.unresolved(issue, linked, origin, UnresolvedReason::SourceNotMigrated);
            return None;
        };
        let Some(other) = identity.target_for(&linked_issue.id) else {
            self.unresolved(issue, linked, origin, UnresolvedReason::TargetNotMigrated);
            return None;
        };
        Some((own, other))
    }
}

/// Resolve every parent pointer and link of `batch` through `identity`.
#[must_use]
pub fn plan_links(batch: &SourceBatch, identity: &IdentityMap) -> LinkPlan {
    let mut planner = Planner::default();

    for issue in batch.issues() {
        let Some(parent_id) = issue.parent_id.as_deref() else {
            continue;
        };
        let reference = (parent_id, issue.parent_index);
        let Some((child, parent)) = planner.endpoints(batch, identity, issue, reference, LinkOrigin::Parent) else {
            continue;
        };
        planner.plan.parents.push(ParentAssignment {
            child_source: issue.id.clone(),
            child,
            parent,
        });
        planner.add(PlannedLink {
            from_source: issue.id.clone(),
            to_source: parent_id.to_string(),
            from: child,
            to: parent,
            relation: RelationType::Hierarchy,
            origin: LinkOrigin::Parent,
        });
    }

    for issue in batch.issues() {
        for link in &issue.links {
            let linked = link.linked_issue_id.as_str();
            if linked == issue.id {
                tracing::warn!(key = %issue.key, "Ignoring link to itself");
                continue;
            }
            let reference = (linked, link.linked_index);
            let Some((own, other)) = planner.endpoints(batch, identity, issue, reference, LinkOrigin::Link) else {
                continue;
            };
            let (relation, orientation) = translate(issue, link);
            let forward = match orientation {
                Orientation::Forward => true,
                Orientation::Reverse => false,
                Orientation::Symmetric => issue.id.as_str() < linked,
            };
            let (from_source, to_source, from, to) = if forward {
                (issue.id.clone(), linked.to_string(), own, other)
            } else {
                (linked.to_string(), issue.id.clone(), other, own)
            };
            planner.add(PlannedLink {
                from_source,
                to_source,
                from,
                to,
                relation,
                origin: LinkOrigin::Link,
            });
        }
    }

    let plan = planner.plan;
    tracing::info!(
        links = plan.links.len(),
        parents = plan.parents.len(),
        unresolved = plan.unresolved.len(),
        "Planned links"
    );
    plan
}

/// Set the parent pointer of every staged record the plan resolved.
pub fn apply_parents(records: &mut [TargetRecord], plan: &LinkPlan) -> usize {
    let mut applied = 0;
    for assignment in &plan.parents {
        if let Some(record) = records.iter_mut().find(|r| r.source_id == assignment.child_source) {
            record.parent = Some(assignment.parent);
            applied += 1;
        }
    }
    applied
}

/// Counts and failures from [`push_links`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkPushReport {
    pub pushed: usize,
    pub already_present: usize,
    pub guard_failures: usize,
    pub unresolved: usize,
    pub failures: Vec<PhaseFailure>,
}

/// Whether `from` already carries `link` as reported by the target.
///
/// Relations match on reference name and the work item id in the URL.
///
/// # Errors
///
/// Propagates the failure of the relations query.
fn relation_exists(target: &dyn TargetBackend, link: &PlannedLink) -> crate::error::Result<bool> {
    let reference = link.relation.reference_name();
    Ok(target
        .relations(link.from)?
        .iter()
        .any(|r| r.rel.eq_ignore_ascii_case(reference) && work_item_id_from_url(&r.url) == Some(link.to)))
}

/// Push every planned link, one independent call each.
///
/// With `check_existing`, the target's current relations are queried first
/// and an equivalent relation skips the push. The check is best-effort: when
/// it fails the link is pushed anyway.
pub fn push_links(target: &dyn TargetBackend, plan: &LinkPlan, check_existing: bool) -> LinkPushReport {
    let mut report = LinkPushReport {
        unresolved: plan.unresolved.len(),
        ..LinkPushReport::default()
    };

    for link in &plan.links {
        if check_existing {
            match relation_exists(target, link) {
                Ok(true) => {
                    tracing::info!(%link, "Link already exists");
                    report.already_present += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%link, error = %err, "Relation lookup failed; pushing anyway");
                    report.guard_failures += 1;
                    report.failures.push(PhaseFailure::new(Step::LinkGuard, link.to_string(), err));
                }
            }
        }

        let url = target.work_item_url(link.to);
        match target.add_relation(link.from, link.relation.reference_name(), &url) {
            Ok(()) => {
                tracing::info!(%link, "Pushed link");
                report.pushed += 1;
            }
            Err(err) => {
                tracing::warn!(%link, %url, error = %err, "Link push failed");
                report.failures.push(PhaseFailure::new(Step::LinkPush, link.to_string(), err));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(system: SourceSystem, id: &str) -> SourceIssue {
        SourceIssue::new(system, id, format!("K-{id}"), "summary")
    }

    fn identity(pairs: &[(&str, WorkItemId)]) -> IdentityMap {
        let mut map = IdentityMap::new();
        for (source, target) in pairs {
            map.insert(source, *target).unwrap();
        }
        map
    }

    #[test]
    fn table_has_no_duplicate_rows() {
        let mut keys = BTreeSet::new();
        for rule in RELATION_TABLE {
            assert!(keys.insert((rule.system, rule.kind, rule.direction)), "duplicate row {rule:?}");
        }
    }

    #[test]
    fn symmetric_rows_only_for_symmetric_relations() {
        for rule in RELATION_TABLE {
            assert_eq!(rule.orientation == Symmetric, rule.relation.is_symmetric(), "{rule:?}");
        }
    }

    #[test]
    fn unknown_link_types_fall_back_to_related() {
        assert_eq!(lookup(YouTrack, K::Blocks, Inward), None);
        let owner = issue(YouTrack, "1");
        let link = SourceLink::new("Gantt", Inward, "2");
        assert_eq!(translate(&owner, &link), (Related, Symmetric));
    }

    #[test]
    fn jira_depends_maps_to_dependency() {
        assert_eq!(lookup(Jira, K::Depends, Inward), Some((DependsOn, Forward)));
        assert_eq!(lookup(Jira, K::Clones, Outward), Some((Duplicate, Reverse)));
    }

    #[test]
    fn mirrored_views_collapse_to_one_edge() {
        let mut a = issue(Jira, "1");
        a.links.push(SourceLink::new("Duplicate", Inward, "2"));
        let mut b = issue(Jira, "2");
        b.links.push(SourceLink::new("Duplicate", Outward, "1"));
        let batch = SourceBatch::new(vec![a, b]);

        let plan = plan_links(&batch, &identity(&[("1", 10), ("2", 20)]));
        assert_eq!(plan.links.len(), 1);
        assert_eq!((plan.links[0].from, plan.links[0].to), (10, 20));
        assert_eq!(plan.links[0].relation, Duplicate);
    }

    #[test]
    fn outward_only_view_still_yields_the_edge() {
        let mut b = issue(Jira, "2");
        b.links.push(SourceLink::new("Depends", Outward, "1"));
        let batch = SourceBatch::new(vec![issue(Jira, "1"), b]);

        let plan = plan_links(&batch, &identity(&[("1", 10), ("2", 20)]));
        assert_eq!(plan.links.len(), 1);
        assert_eq!((plan.links[0].from, plan.links[0].to), (10, 20));
    }

    #[test]
    fn symmetric_links_anchor_on_smaller_source_id() {
        let mut a = issue(YouTrack, "2-5");
        a.links.push(SourceLink::new("Relates", Both, "2-1"));
        let mut b = issue(YouTrack, "2-1");
        b.links.push(SourceLink::new("Relates", Both, "2-5"));
        let batch = SourceBatch::new(vec![a, b]);

        let plan = plan_links(&batch, &identity(&[("2-5", 50), ("2-1", 10)]));
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].from_source, "2-1");
        assert_eq!(plan.links[0].from, 10);
    }

    #[test]
    fn parent_and_subtask_link_share_one_edge() {
        let mut child = issue(YouTrack, "2");
        child.parent_id = Some("1".to_string());
        child.links.push(SourceLink::new("Subtask", Inward, "1"));
        let mut parent = issue(YouTrack, "1");
        parent.links.push(SourceLink::new("Subtask", Outward, "2"));
        let batch = SourceBatch::new(vec![parent, child]);

        let plan = plan_links(&batch, &identity(&[("1", 100), ("2", 200)]));
        assert_eq!(plan.parents.len(), 1);
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].relation, Hierarchy);
        assert_eq!(plan.links[0].origin, LinkOrigin::Parent);
        assert_eq!((plan.links[0].from, plan.links[0].to), (200, 100));
    }

    #[test]
    fn unresolved_references_are_reported() {
        let mut a = issue(Jira, "1");
        a.links.push(SourceLink::new("Relates", Inward, "2"));
        a.links.push(SourceLink::new("Relates", Inward, "99"));
        let mut b = issue(Jira, "3");
        b.parent_id = Some("1".to_string());
        let batch = SourceBatch::new(vec![a, issue(Jira, "2"), b]);

        let plan = plan_links(&batch, &identity(&[("1", 10), ("3", 30)]));
        assert!(plan.links.iter().all(|l| l.relation == Hierarchy));
        let reasons: Vec<_> = plan.unresolved.iter().map(|u| u.reason).collect();
        assert_eq!(reasons, [UnresolvedReason::TargetNotMigrated, UnresolvedReason::NotInBatch]);
    }

    #[test]
    fn endpoints_follow_batch_positions() {
        let mut child = issue(YouTrack, "2");
        child.parent_id = Some("1".to_string());
        child.links.push(SourceLink::new("Relates", Both, "1"));
        let mut batch = SourceBatch::new(vec![issue(YouTrack, "1"), child]);
        assert_eq!(batch.issues()[1].parent_index, Some(0));

        let stale = &mut batch.issues_mut()[1];
        stale.parent_index = None;
        stale.links[0].linked_index = None;

        let plan = plan_links(&batch, &identity(&[("1", 10), ("2", 20)]));
        assert!(plan.links.is_empty());
        assert!(plan.unresolved.iter().all(|u| u.reason == UnresolvedReason::NotInBatch));
        assert_eq!(plan.unresolved.len(), 2);
    }

    #[test]
    fn self_links_are_ignored() {
        let mut a = issue(Jira, "1");
        a.links.push(SourceLink::new("Relates", Inward, "1"));
        let plan = plan_links(&SourceBatch::new(vec![a]), &identity(&[("1", 10)]));
        assert!(plan.links.is_empty());
    }

    #[test]
    fn apply_parents_sets_record_pointer() {
        let mut records = vec![TargetRecord::new(
            crate::model::CorrelationSequence::starting_at(1).next_id(),
            "2",
            "K-2",
            "Task",
            "K-2 x",
        )];
        let plan = LinkPlan {
            parents: vec![ParentAssignment {
                child_source: "2".to_string(),
                child: 20,
                parent: 10,
            }],
            ..LinkPlan::default()
        };
        assert_eq!(apply_parents(&mut records, &plan), 1);
        assert_eq!(records[0].parent, Some(10));
    }
}

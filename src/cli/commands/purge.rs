//! `purge` command implementation.

use serde::Serialize;

use super::{load_migration_config, open_target};
use crate::backend::TargetBackend;
use crate::cli::PurgeArgs;
use crate::config::CliOverrides;
use crate::error::{MigrateError, Result};
use crate::model::WorkItemId;

/// Counts from [`purge`].
#[derive(Debug, Default, Serialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: Vec<WorkItemId>,
}

/// Hard-delete every work item in the target project, one call each.
///
/// # Errors
///
/// Returns an error only if the id listing fails.
pub fn purge(target: &dyn TargetBackend) -> Result<PurgeReport> {
    let ids = target.list_work_item_ids()?;
    tracing::info!(count = ids.len(), "Deleting work items");
    let mut report = PurgeReport::default();
    for id in ids {
        match target.delete_work_item(id) {
            Ok(()) => {
                tracing::debug!(work_item = id, "Deleted");
                report.deleted += 1;
            }
            Err(err) => {
                tracing::warn!(work_item = id, error = %err, "Delete failed");
                report.failed.push(id);
            }
        }
    }
    Ok(report)
}

/// Execute the purge command.
///
/// # Errors
///
/// Returns an error without `--yes`, for configuration problems, or when the
/// listing fails.
pub fn execute(args: &PurgeArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    if !args.yes {
        return Err(MigrateError::Config(
            "purge deletes every work item in the project; pass --yes to confirm".to_string(),
        ));
    }
    let config = load_migration_config(cli)?;
    let target = open_target(&config)?;
    let report = purge(&target)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Deleted {} work items, {} failed", report.deleted, report.failed.len());
    }
    Ok(())
}

//! `mapping` command implementation.

use std::collections::BTreeMap;

use super::{load_migration_config, open_target};
use crate::backend::{TargetBackend, pull_existing_items};
use crate::config::CliOverrides;
use crate::detect::{ExistingWorkItem, source_key_of_title};
use crate::error::Result;

/// Source key to work item id, as strings, first occurrence wins.
#[must_use]
pub fn key_mapping(items: &[ExistingWorkItem]) -> BTreeMap<String, String> {
    let mut mapping = BTreeMap::new();
    for item in items {
        let Some(key) = source_key_of_title(&item.title) else {
            tracing::debug!(work_item = item.id, "Untitled work item");
            continue;
        };
        if let Some(first) = mapping.get(key) {
            tracing::warn!(key, work_item = item.id, first = %first, "Key appears on several work items");
            continue;
        }
        mapping.insert(key.to_string(), item.id.to_string());
    }
    mapping
}

/// Pull the target and build the mapping.
///
/// # Errors
///
/// Returns an error if the target cannot be listed.
pub fn pull_mapping(target: &dyn TargetBackend, batch_size: usize) -> Result<BTreeMap<String, String>> {
    let items = pull_existing_items(target, batch_size)?;
    Ok(key_mapping(&items))
}

/// Execute the mapping command. Output is always JSON.
///
/// # Errors
///
/// Returns an error for configuration problems or a failed listing.
pub fn execute(cli: &CliOverrides) -> Result<()> {
    let config = load_migration_config(cli)?;
    let target = open_target(&config)?;
    let mapping = pull_mapping(&target, config.target.fetch_batch_size)?;
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

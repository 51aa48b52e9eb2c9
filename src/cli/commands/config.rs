//! `config` command implementation.

use std::collections::BTreeMap;

use crate::config::{self, CliOverrides, MigrationConfig};
use crate::error::Result;

/// Print every resolved key, secrets redacted.
///
/// # Errors
///
/// Returns an error if a config file cannot be read or a value fails to parse.
pub fn execute(json: bool, cli: &CliOverrides) -> Result<()> {
    let layer = config::load_config(cli)?;
    // Fail on values that would not type-check, same as `migrate` would.
    MigrationConfig::from_layer(&layer)?;
    let entries = layer.redacted_entries();

    if json {
        let map: BTreeMap<_, _> = entries.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

//! `migrate` command implementation.

use serde::Serialize;

use super::{load_migration_config, open_source, open_target};
use crate::cli::MigrateArgs;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::links::LinkPushReport;
use crate::migrate::{self, ItemReport, MigrationOptions, MigrationSummary};
use crate::model::CorrelationSequence;

/// JSON output for a finished run.
#[derive(Serialize)]
struct MigrateOutput<'a> {
    summary: &'a MigrationSummary,
    items: &'a [ItemReport],
    links: Option<&'a LinkPushReport>,
}

/// Execute the migrate command.
///
/// # Errors
///
/// Returns an error for configuration problems or when the source or target
/// listing cannot be pulled. Per-item failures only show up in the summary.
pub fn execute(args: &MigrateArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let config = load_migration_config(cli)?;
    let target = open_target(&config)?;
    let source = open_source(args.source, &config)?;

    let options = MigrationOptions {
        limit: args.limit,
        dry_run: args.dry_run,
        key_match: config.key_match,
        check_existing_links: config.target.check_existing_links,
        fetch_batch_size: config.target.fetch_batch_size,
    };
    let mut sequence = CorrelationSequence::from_clock();
    let run = migrate::run(source.as_ref(), &target, &options, &mut sequence)?;

    if json {
        let output = MigrateOutput {
            summary: &run.summary,
            items: &run.push.items,
            links: run.links.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", run.summary);
    }
    Ok(())
}

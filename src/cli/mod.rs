//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{CliOverrides, parse_setting};
use crate::model::SourceSystem;

pub mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "ticket-migrate",
    version,
    about = "Migrate Jira or YouTrack issues into Azure DevOps",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Errors only.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Also write JSON logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Project config file (default: ./ticket-migrate.yaml).
    #[arg(long, global = true, value_name = "PATH", env = "TICKET_MIGRATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override a config key, e.g. `--set target.project=Apollo`.
    #[arg(long = "set", global = true, value_name = "KEY=VALUE", value_parser = parse_setting)]
    pub settings: Vec<(String, String)>,

    /// Machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull one source system and push it into the target project.
    Migrate(MigrateArgs),

    /// Print the source key to work item id mapping of the target project.
    Mapping,

    /// Delete every work item in the target project.
    Purge(PurgeArgs),

    /// Print the resolved configuration (secrets redacted).
    Config,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Source system: jira or youtrack.
    #[arg(value_parser = parse_source)]
    pub source: SourceSystem,

    /// Stop after this many source issues.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Pull and detect, but push nothing.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Confirm the deletion.
    #[arg(long)]
    pub yes: bool,
}

fn parse_source(raw: &str) -> Result<SourceSystem, String> {
    raw.parse().map_err(|err: crate::error::MigrateError| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_with_globals() {
        let cli = Cli::try_parse_from([
            "ticket-migrate",
            "-vv",
            "migrate",
            "youtrack",
            "--limit",
            "5",
            "--set",
            "target.project=Apollo",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.settings, [("target.project".to_string(), "Apollo".to_string())]);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.source, SourceSystem::YouTrack);
        assert_eq!(args.limit, Some(5));
        assert!(!args.dry_run);
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(Cli::try_parse_from(["ticket-migrate", "migrate", "github"]).is_err());
    }
}

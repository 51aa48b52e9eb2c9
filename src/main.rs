use anyhow::Result;
use clap::Parser;

use ticket_migrate::cli::{Cli, Commands, commands};
use ticket_migrate::logging::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    let overrides = cli.overrides();
    match &cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args, cli.json, &overrides)?,
        Commands::Mapping => commands::mapping::execute(&overrides)?,
        Commands::Purge(args) => commands::purge::execute(args, cli.json, &overrides)?,
        Commands::Config => commands::config::execute(cli.json, &overrides)?,
    }
    Ok(())
}

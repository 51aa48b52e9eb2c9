//! Command implementations.

pub mod config;
pub mod mapping;
pub mod migrate;
pub mod purge;

use crate::backend::SourceBackend;
use crate::backend::azure::AzureTarget;
use crate::backend::jira::JiraSource;
use crate::backend::youtrack::YouTrackSource;
use crate::config::{self as cfg, CliOverrides, MigrationConfig};
use crate::error::Result;
use crate::model::SourceSystem;

/// Load every config layer and type it.
///
/// # Errors
///
/// Returns an error if a config file cannot be read or a value fails to parse.
pub fn load_migration_config(cli: &CliOverrides) -> Result<MigrationConfig> {
    let layer = cfg::load_config(cli)?;
    MigrationConfig::from_layer(&layer)
}

/// # Errors
///
/// Returns an error when target settings are missing.
pub fn open_target(config: &MigrationConfig) -> Result<AzureTarget> {
    AzureTarget::from_config(&config.target, config.http_timeout)
}

/// # Errors
///
/// Returns an error when the selected source's settings are missing.
pub fn open_source(system: SourceSystem, config: &MigrationConfig) -> Result<Box<dyn SourceBackend>> {
    Ok(match system {
        SourceSystem::Jira => Box::new(JiraSource::from_config(&config.jira, config.http_timeout)?),
        SourceSystem::YouTrack => Box::new(YouTrackSource::from_config(&config.youtrack, config.http_timeout)?),
    })
}

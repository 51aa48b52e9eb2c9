//! `ticket_migrate` - issue tracker migration library
//!
//! Moves tickets, comments, attachments and links from Jira or YouTrack into
//! an Azure DevOps project, and can be re-run without duplicating items that
//! were already migrated.
//!
//! # Architecture
//!
//! - [`model`] - Source snapshots and target staging records
//! - [`identity`] - Source id to work item id mapping
//! - [`detect`] - Detection of already-migrated work items
//! - [`mapping`] - Per-source field mapping
//! - [`rewrite`] - Attachment reference rewriting in rich text
//! - [`pipeline`] - Per-item push pipeline
//! - [`links`] - Parent and link rebuilding
//! - [`migrate`] - Two-stage batch driver
//! - [`backend`] - Source and target backends
//! - [`config`] - Layered configuration
//! - [`cli`] - Command-line interface using clap

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod identity;
pub mod links;
pub mod logging;
pub mod mapping;
pub mod migrate;
pub mod model;
pub mod pipeline;
pub mod rewrite;

pub use error::{MigrateError, Result};

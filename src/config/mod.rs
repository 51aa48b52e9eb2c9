//! Layered configuration for `ticket_migrate`.
//!
//! Precedence, lowest to highest:
//! 1. built-in defaults
//! 2. user config (`~/.config/ticket-migrate/config.yaml`)
//! 3. project config (`./ticket-migrate.yaml`, or `--config <path>`)
//! 4. environment variables prefixed `TICKET_MIGRATE_`
//! 5. CLI overrides (`--set key=value`)
//!
//! Every layer is flattened to dotted, kebab-case keys (`target.base-url`)
//! before being turned into a typed [`MigrationConfig`].

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::KeyMatchMode;
use crate::error::{MigrateError, Result};

const ENV_PREFIX: &str = "TICKET_MIGRATE_";
const PROJECT_CONFIG_FILENAME: &str = "ticket-migrate.yaml";

/// Key fragments whose values are never printed.
const SECRET_MARKERS: &[&str] = &["token", "password", "secret"];

/// A flat set of configuration keys from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_vars(env::vars())
    }

    /// Build a layer from `TICKET_MIGRATE_*` pairs.
    #[must_use]
    pub fn from_env_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                for variant in env_key_variants(stripped) {
                    layer.values.insert(variant, value.clone());
                }
            }
        }
        layer
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// Sorted `(key, value)` pairs with secrets masked, for display.
    #[must_use]
    pub fn redacted_entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(key, value)| {
                let shown = if is_secret_key(key) {
                    "********".to_string()
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect();
        entries.sort();
        entries
    }
}

/// CLI overrides for config loading.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Replaces `./ticket-migrate.yaml` as the project config.
    pub config_path: Option<PathBuf>,
    /// `key=value` pairs from `--set`.
    pub settings: Vec<(String, String)>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        for (key, value) in &self.settings {
            layer.set(key, value.clone());
        }
        layer
    }
}

/// Parse a `key=value` pair from the command line.
///
/// # Errors
///
/// Returns an error when there is no `=` or the key is empty.
pub fn parse_setting(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((normalize_key(key), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    for (key, value) in [
        ("target.base-url", "https://dev.azure.com"),
        ("target.api-version", "7.1-preview.3"),
        ("target.id-range-size", "10000"),
        ("target.id-scan-floor", "100000"),
        ("target.fetch-batch-size", "50"),
        ("target.check-existing-links", "true"),
        ("target.bypass-rules", "true"),
        ("target.tester-field", "Custom.Tester"),
        ("jira.page-size", "50"),
        ("youtrack.auth", "bearer"),
        ("youtrack.page-size", "100"),
        ("youtrack.user-page-size", "20"),
        ("detector.loose-prefix", "false"),
        ("http.timeout-secs", "60"),
    ] {
        layer.values.insert(key.to_string(), value.to_string());
    }
    layer
}

/// Load user config (~/.config/ticket-migrate/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("ticket-migrate")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load the project config, from `--config` or the working directory.
///
/// # Errors
///
/// Returns an error if an explicit path does not exist, or a file cannot be
/// read or parsed.
pub fn load_project_config(explicit: Option<&Path>) -> Result<ConfigLayer> {
    match explicit {
        Some(path) if !path.exists() => Err(MigrateError::Config(format!(
            "config file not found: {}",
            path.display()
        ))),
        Some(path) => ConfigLayer::from_yaml(path),
        None => ConfigLayer::from_yaml(Path::new(PROJECT_CONFIG_FILENAME)),
    }
}

/// Load configuration with the full precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(cli: &CliOverrides) -> Result<ConfigLayer> {
    let defaults = default_config_layer();
    let user = load_user_config()?;
    let project = load_project_config(cli.config_path.as_deref())?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[
        defaults, user, project, env_layer, cli_layer,
    ]))
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

/// Azure DevOps connection and query settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub base_url: String,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub token: Option<Secret>,
    pub api_version: String,
    /// Area below the project root; `None` files items at the root.
    pub area_path: Option<String>,
    pub id_range_size: u32,
    pub id_scan_floor: u32,
    pub fetch_batch_size: usize,
    pub check_existing_links: bool,
    pub bypass_rules: bool,
    /// Reference name of the field holding the tester.
    pub tester_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraConfig {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<Secret>,
    pub project: Option<String>,
    pub page_size: usize,
    /// Extra JQL appended to the project filter.
    pub query: Option<String>,
}

/// How YouTrack requests authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouTrackAuth {
    Bearer,
    Basic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YouTrackConfig {
    pub base_url: Option<String>,
    pub token: Option<Secret>,
    pub auth: YouTrackAuth,
    pub login: Option<String>,
    pub query: Option<String>,
    pub page_size: usize,
    pub user_page_size: usize,
}

/// Fully typed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub target: TargetConfig,
    pub jira: JiraConfig,
    pub youtrack: YouTrackConfig,
    pub key_match: KeyMatchMode,
    pub http_timeout: Duration,
}

impl MigrationConfig {
    /// Build typed config from a merged layer.
    ///
    /// Credentials stay optional here; backends report missing keys when
    /// they are constructed.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] for values that fail to parse.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let target = TargetConfig {
            base_url: string_or(layer, "target.base-url", "https://dev.azure.com"),
            organization: optional(layer, "target.organization"),
            project: optional(layer, "target.project"),
            token: optional(layer, "target.token").map(Secret::new),
            api_version: string_or(layer, "target.api-version", "7.1-preview.3"),
            area_path: optional(layer, "target.area-path"),
            id_range_size: parse_number(layer, "target.id-range-size", 10_000)?,
            id_scan_floor: parse_number(layer, "target.id-scan-floor", 100_000)?,
            fetch_batch_size: parse_number(layer, "target.fetch-batch-size", 50)?,
            check_existing_links: parse_flag(layer, "target.check-existing-links", true)?,
            bypass_rules: parse_flag(layer, "target.bypass-rules", true)?,
            tester_field: string_or(layer, "target.tester-field", "Custom.Tester"),
        };
        if target.id_range_size == 0 || target.fetch_batch_size == 0 {
            return Err(MigrateError::Config(
                "target.id-range-size and target.fetch-batch-size must be positive".to_string(),
            ));
        }

        let jira = JiraConfig {
            base_url: optional(layer, "jira.base-url"),
            email: optional(layer, "jira.email"),
            api_token: optional(layer, "jira.api-token").map(Secret::new),
            project: optional(layer, "jira.project"),
            page_size: parse_number(layer, "jira.page-size", 50)?,
            query: optional(layer, "jira.query"),
        };

        let auth = match layer.get("youtrack.auth").map(str::to_ascii_lowercase).as_deref() {
            None | Some("bearer") => YouTrackAuth::Bearer,
            Some("basic") => YouTrackAuth::Basic,
            Some(other) => {
                return Err(MigrateError::Config(format!(
                    "youtrack.auth must be bearer or basic, got '{other}'"
                )));
            }
        };
        let youtrack = YouTrackConfig {
            base_url: optional(layer, "youtrack.base-url"),
            token: optional(layer, "youtrack.token").map(Secret::new),
            auth,
            login: optional(layer, "youtrack.login"),
            query: optional(layer, "youtrack.query"),
            page_size: parse_number(layer, "youtrack.page-size", 100)?,
            user_page_size: parse_number(layer, "youtrack.user-page-size", 20)?,
        };

        Ok(Self {
            target,
            jira,
            youtrack,
            key_match: KeyMatchMode::from_loose_flag(parse_flag(
                layer,
                "detector.loose-prefix",
                false,
            )?),
            http_timeout: Duration::from_secs(parse_number(layer, "http.timeout-secs", 60)?),
        })
    }
}

/// Fetch a required value, reporting its key when absent.
///
/// # Errors
///
/// Returns [`MigrateError::MissingConfig`] when `value` is `None`.
pub fn require<'a, T: ?Sized>(value: Option<&'a T>, key: &str) -> Result<&'a T> {
    value.ok_or_else(|| MigrateError::missing(key))
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

/// `TARGET_BASE_URL` → `target.base-url`: the first segment is the section.
fn env_key_variants(raw: &str) -> Vec<String> {
    let lower = raw.to_lowercase();
    match lower.split_once('_') {
        Some((section, rest)) => vec![format!("{section}.{}", rest.replace('_', "-"))],
        None => vec![lower],
    }
}

fn is_secret_key(key: &str) -> bool {
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn optional(layer: &ConfigLayer, key: &str) -> Option<String> {
    layer
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn string_or(layer: &ConfigLayer, key: &str, default: &str) -> String {
    optional(layer, key).unwrap_or_else(|| default.to_string())
}

fn parse_number<T: std::str::FromStr>(layer: &ConfigLayer, key: &str, default: T) -> Result<T> {
    match layer.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| MigrateError::Config(format!("{key} must be a number, got '{raw}'"))),
    }
}

fn parse_flag(layer: &ConfigLayer, key: &str, default: bool) -> Result<bool> {
    match layer.get(key) {
        None => Ok(default),
        Some(raw) => parse_bool(raw)
            .ok_or_else(|| MigrateError::Config(format!("{key} must be true or false, got '{raw}'"))),
    }
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    let mut layer = ConfigLayer::default();
    for (key, value) in flat {
        layer.set(&key, value);
    }
    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}

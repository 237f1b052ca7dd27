//! TOML-based configuration system for membersync.
//!
//! API tokens are stored as `token_env` fields that reference environment
//! variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`]. The process-wide switches `AUTO_PROVISION`,
//! `DRY_RUN` and `INVITE_TO_ALL_ORGS` override the `[sync]` section via
//! [`AppConfig::apply_env_overrides`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Environment switch selecting auto-provisioning instead of invitations.
pub const AUTO_PROVISION_ENV: &str = "AUTO_PROVISION";
/// Environment switch that computes the diff without changing anything.
pub const DRY_RUN_ENV: &str = "DRY_RUN";
/// Environment switch that disables cross-org pending-invite suppression.
pub const INVITE_TO_ALL_ORGS_ENV: &str = "INVITE_TO_ALL_ORGS";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory API connection settings.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Reconciliation policy.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Groups to reconcile.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

// ---------------------------------------------------------------------------
// Directory API
// ---------------------------------------------------------------------------

/// Directory API connection, retry and rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the v1 API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the versioned REST API (used for invitations).
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Prefix prepended to the user agent string.
    #[serde(default = "default_user_agent_prefix")]
    pub user_agent_prefix: String,

    /// Total attempts per request, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Requests allowed per `period_ms`.
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Rate-limit window in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// First retry delay in milliseconds; doubles on each further attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.snyk.io/v1".into()
}
fn default_rest_url() -> String {
    "https://api.snyk.io/rest".into()
}
fn default_user_agent_prefix() -> String {
    "membersync".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_burst_size() -> u32 {
    1
}
fn default_period_ms() -> u64 {
    1000
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            rest_url: default_rest_url(),
            user_agent_prefix: default_user_agent_prefix(),
            max_attempts: default_max_attempts(),
            burst_size: default_burst_size(),
            period_ms: default_period_ms(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Sync policy
// ---------------------------------------------------------------------------

/// Reconciliation policy switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Provision unknown users instead of inviting them.
    #[serde(default)]
    pub auto_provision: bool,

    /// Compute and log the diff without changing anything.
    #[serde(default)]
    pub dry_run: bool,

    /// Invite users even when they have an invite pending in another org.
    #[serde(default)]
    pub invite_to_all_orgs: bool,

    /// Maximum in-flight requests while executing a queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_provision: false,
            dry_run: false,
            invite_to_all_orgs: false,
            concurrency: default_concurrency(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A group to reconcile and the credential used to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group label; membership rows are matched against it.
    pub name: String,

    /// Directory identifier of the group.
    pub id: String,

    /// Environment variable holding the API token for this group.
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

impl GroupConfig {
    /// Whether a membership row's group label refers to this group.
    pub fn matches_label(&self, label: &str) -> bool {
        labels_match(&self.name, label)
    }
}

/// Group labels compare case-insensitively, ignoring surrounding whitespace.
pub fn labels_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(groups = config.groups.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Resolve each group's `token_env` reference.
    ///
    /// Missing variables log a warning but do not fail; a group without a
    /// token will be rejected by the directory on its first request.
    pub fn resolve_env_vars(&mut self) {
        info!("resolving environment variable references in config");
        for group in &mut self.groups {
            let field = format!("groups.{}.token_env", group.name);
            group.token = resolve_optional_env(&group.token_env, &field);
        }
    }

    /// Apply the `AUTO_PROVISION`, `DRY_RUN` and `INVITE_TO_ALL_ORGS`
    /// process switches on top of the `[sync]` section.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_flag(AUTO_PROVISION_ENV) {
            self.sync.auto_provision = v;
        }
        if let Some(v) = env_flag(DRY_RUN_ENV) {
            self.sync.dry_run = v;
        }
        if let Some(v) = env_flag(INVITE_TO_ALL_ORGS_ENV) {
            self.sync.invite_to_all_orgs = v;
        }
        debug!(
            auto_provision = self.sync.auto_provision,
            dry_run = self.sync.dry_run,
            invite_to_all_orgs = self.sync.invite_to_all_orgs,
            "sync switches after environment overrides"
        );
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.api_url.is_empty() {
            return Err(invalid("directory.api_url", "API URL must not be empty"));
        }
        if self.directory.rest_url.is_empty() {
            return Err(invalid("directory.rest_url", "REST URL must not be empty"));
        }
        if self.directory.max_attempts == 0 {
            return Err(invalid("directory.max_attempts", "must be > 0"));
        }
        if self.directory.burst_size == 0 {
            return Err(invalid("directory.burst_size", "must be > 0"));
        }
        if self.directory.period_ms == 0 {
            return Err(invalid("directory.period_ms", "must be > 0"));
        }
        if self.sync.concurrency == 0 {
            return Err(invalid("sync.concurrency", "must be > 0"));
        }
        if self.groups.is_empty() {
            return Err(invalid("groups", "at least one group must be configured"));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(invalid("groups.name", "group name must not be empty"));
            }
            if group.id.trim().is_empty() {
                return Err(invalid(
                    "groups.id",
                    &format!("group '{}' has an empty id", group.name),
                ));
            }
            if !seen.insert(group.name.trim().to_lowercase()) {
                return Err(invalid(
                    "groups.name",
                    &format!("group '{}' is configured more than once", group.name),
                ));
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, apply overrides and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Look up a configured group by name (case-insensitive).
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.matches_label(name))
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

/// Read a boolean switch. Unset means "no override".
fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    Some(parse_flag(&raw))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

//! membersync command-line tool.
//!
//! Reconciles the memberships listed in a JSON file against each configured
//! group, previews the diff, and generates / validates configuration files.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use membersync_core::config::{AppConfig, GroupConfig};
use membersync_core::directory::DirectoryClient;
use membersync_core::engine::{EngineOptions, ReconcileEngine, RunReport};
use membersync_core::membership_file::MembershipFile;
use membersync_core::models::DesiredMembership;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// membersync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "membersync",
    version,
    about = "Reconcile group directory memberships against a desired list"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./membersync.toml")]
    config: PathBuf,

    /// Log filter (overrides `[logging] log_level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile memberships and apply the changes.
    Sync {
        #[command(flatten)]
        run: RunArgs,

        /// Compute and log the diff without changing anything.
        #[arg(long)]
        dry_run: bool,

        /// Provision unknown users instead of inviting them.
        #[arg(long)]
        auto_provision: bool,

        /// Invite users even when an invite is pending in another org.
        #[arg(long)]
        invite_to_all_orgs: bool,
    },

    /// Show the membership diff without changing anything.
    Diff {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./membersync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON file listing the desired memberships.
    #[arg(short, long)]
    membership_file: PathBuf,

    /// Only reconcile this group.
    #[arg(short, long)]
    group: Option<String>,

    /// Write the run report(s) as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        Commands::Sync {
            run,
            dry_run,
            auto_provision,
            invite_to_all_orgs,
        } => {
            let mut config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.log_level));
            // Switches only ever turn a behaviour on.
            config.sync.dry_run |= dry_run;
            config.sync.auto_provision |= auto_provision;
            config.sync.invite_to_all_orgs |= invite_to_all_orgs;
            cmd_sync(&config, &run).await
        }
        Commands::Diff { run } => {
            let mut config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.log_level));
            config.sync.dry_run = true;
            cmd_sync(&config, &run).await
        }
    }
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration")
}

/// Groups to reconcile: every configured group, or just `--group`.
fn selected_groups<'a>(config: &'a AppConfig, only: Option<&str>) -> Result<Vec<&'a GroupConfig>> {
    match only {
        Some(name) => {
            let group = config
                .group(name)
                .ok_or_else(|| anyhow::anyhow!("group '{}' is not configured", name))?;
            Ok(vec![group])
        }
        None => Ok(config.groups.iter().collect()),
    }
}

/// Pair each selected group with its desired rows.
///
/// Without `--group`, a group with no rows is skipped: reconciling it would
/// remove every managed membership. An explicitly selected group is always
/// reconciled, even against an empty list.
fn groups_to_reconcile<'a>(
    config: &'a AppConfig,
    memberships: &MembershipFile,
    only: Option<&str>,
) -> Result<Vec<(&'a GroupConfig, Vec<DesiredMembership>)>> {
    for label in memberships.group_labels() {
        if config.group(label).is_none() {
            warn!(
                group = label,
                "membership rows reference a group that is not configured"
            );
        }
    }

    let mut selected = Vec::new();
    for group in selected_groups(config, only)? {
        let rows = memberships.rows_for_group(group);
        if rows.is_empty() && only.is_none() {
            warn!(group = %group.name, "no membership rows for group, skipping");
            println!(
                "Skipping group {}: no membership rows (use --group to reconcile it anyway)",
                group.name
            );
            continue;
        }
        selected.push((group, rows));
    }
    Ok(selected)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(config: &AppConfig, args: &RunArgs) -> Result<()> {
    let memberships = MembershipFile::load(&args.membership_file)
        .context("failed to load membership file")?;
    let groups = groups_to_reconcile(config, &memberships, args.group.as_deref())?;
    let options = EngineOptions::from_config(&config.sync);

    if options.dry_run {
        println!("Dry run: no changes will be made.");
        println!();
    }

    let mut reports = Vec::with_capacity(groups.len());
    for (group, rows) in groups {
        let token = group.token.as_deref().with_context(|| {
            format!(
                "no API token for group '{}': set the {} environment variable",
                group.name, group.token_env
            )
        })?;
        let client = DirectoryClient::new(&config.directory, token)
            .with_context(|| format!("failed to create directory client for '{}'", group.name))?;

        println!("Group {} ({} membership rows)", group.name, rows.len());

        let engine = ReconcileEngine::for_group(Arc::new(client), group, options);
        let report = engine
            .run(&rows)
            .await
            .map_err(|e| anyhow::anyhow!("reconciliation failed: {}", e))?;

        output::print_report(&report);
        reports.push(report);
    }

    if let Some(path) = &args.report {
        write_reports(path, &reports)?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn write_reports(path: &Path, reports: &[RunReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports).context("failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# membersync configuration

[directory]
api_url = "https://api.snyk.io/v1"
rest_url = "https://api.snyk.io/rest"
user_agent_prefix = "membersync"
max_attempts = 5
burst_size = 1
period_ms = 1000
retry_base_ms = 500
timeout_secs = 30

[sync]
# AUTO_PROVISION, DRY_RUN and INVITE_TO_ALL_ORGS in the environment
# override these values.
auto_provision = false
dry_run = false
invite_to_all_orgs = false
concurrency = 10

[logging]
log_level = "info"

[[groups]]
name = "My Group"
id = "00000000-0000-0000-0000-000000000000"
token_env = "MEMBERSYNC_TOKEN"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set each group's name and id");
    println!("  2. Export the referenced token variables (MEMBERSYNC_TOKEN, etc.)");
    println!(
        "  3. Validate with: membersync validate --config {}",
        output.display()
    );
    println!(
        "  4. Preview changes: membersync diff --config {} --membership-file memberships.json",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_env_vars();
    config.apply_env_overrides();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  API URL       : {}", config.directory.api_url);
    println!("  REST URL      : {}", config.directory.rest_url);
    println!(
        "  Rate limit    : {} request(s) per {}ms, {} attempt(s)",
        config.directory.burst_size, config.directory.period_ms, config.directory.max_attempts
    );
    println!("  Concurrency   : {}", config.sync.concurrency);
    println!(
        "  Policy        : {}{}{}",
        if config.sync.auto_provision {
            "auto-provision"
        } else {
            "invite"
        },
        if config.sync.invite_to_all_orgs {
            ", invite to all orgs"
        } else {
            ""
        },
        if config.sync.dry_run { ", dry run" } else { "" }
    );
    for group in &config.groups {
        println!(
            "  Group         : {} [{}] token {}",
            group.name,
            group.id,
            if group.token.is_some() { "set" } else { "NOT SET" }
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "membersync",
            "--config",
            "/tmp/m.toml",
            "sync",
            "--membership-file",
            "members.json",
            "--group",
            "Acme Group",
            "--dry-run",
            "--invite-to-all-orgs",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/m.toml"));
        match cli.command {
            Commands::Sync {
                run,
                dry_run,
                auto_provision,
                invite_to_all_orgs,
            } => {
                assert_eq!(run.membership_file, PathBuf::from("members.json"));
                assert_eq!(run.group.as_deref(), Some("Acme Group"));
                assert!(dry_run);
                assert!(!auto_provision);
                assert!(invite_to_all_orgs);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.groups[0].token_env, "MEMBERSYNC_TOKEN");
        assert_eq!(config.sync.concurrency, 10);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membersync.toml");
        cmd_init(&path).unwrap();
        assert!(path.exists());
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_selected_groups() {
        let config: AppConfig = toml::from_str(
            r#"
[[groups]]
name = "Acme Group"
id = "g1"
token_env = "A_TOKEN"

[[groups]]
name = "Beta Group"
id = "g2"
token_env = "B_TOKEN"
"#,
        )
        .unwrap();
        assert_eq!(selected_groups(&config, None).unwrap().len(), 2);
        let only = selected_groups(&config, Some("beta group")).unwrap();
        assert_eq!(only[0].id, "g2");
        assert!(selected_groups(&config, Some("Gamma")).is_err());
    }

    fn two_group_config() -> AppConfig {
        toml::from_str(
            r#"
[[groups]]
name = "Acme Group"
id = "g1"
token_env = "A_TOKEN"

[[groups]]
name = "Beta Group"
id = "g2"
token_env = "B_TOKEN"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_groups_without_rows_are_skipped() {
        let config = two_group_config();
        let memberships = MembershipFile {
            members: vec![
                DesiredMembership::new("bob@acme.com", "Acme", "admin", "beta group"),
                DesiredMembership::new("zed@other.com", "Zeta", "admin", "Other Group"),
            ],
        };

        let selected = groups_to_reconcile(&config, &memberships, None).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.id, "g2");
        assert_eq!(selected[0].1.len(), 1);
    }

    #[test]
    fn test_explicit_group_is_reconciled_without_rows() {
        let config = two_group_config();
        let memberships = MembershipFile {
            members: vec![DesiredMembership::new("zed@other.com", "Zeta", "admin", "Other Group")],
        };

        assert!(groups_to_reconcile(&config, &memberships, None).unwrap().is_empty());
        let selected = groups_to_reconcile(&config, &memberships, Some("Acme Group")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.id, "g1");
        assert!(selected[0].1.is_empty());
    }
}

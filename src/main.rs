//! TaskMirror - JIRA issue mirror
//!
//! Main entry point for the taskmirror CLI.

mod commands;

use clap::Parser;
use commands::{Cli, Commands};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use taskmirror::config::{validate_config_result, MirrorConfig};
use taskmirror::daemon::{validate_interval, DaemonConfig, SyncDaemon};
use taskmirror::integrations::JiraClient;
use taskmirror::mirror::{IssueFilter, MirrorStore};
use taskmirror::reconcile::Reconciler;
use taskmirror::server::MirrorServer;
use taskmirror::{MirrorError, Result};
use tokio::sync::Mutex;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    if let Err(e) = taskmirror::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Init creates the config, so it runs before loading one
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config.as_deref(), force);
    }

    let config = load_config(cli.config.as_deref())?;
    validate_config_result(&config)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::CheckAuth => handle_check_auth(&config).await,
        Commands::Sync { keys, json } => handle_sync(&config, keys, json).await,
        Commands::List {
            key,
            status,
            all,
            json,
        } => handle_list(&config, &key, status, all, json),
        Commands::Serve { address } => handle_serve(&config, address).await,
        Commands::Daemon { interval } => handle_daemon(&config, interval).await,
    }
}

fn config_path(path: Option<&str>) -> PathBuf {
    path.map(PathBuf::from)
        .unwrap_or_else(MirrorConfig::default_path)
}

fn load_config(path: Option<&str>) -> Result<MirrorConfig> {
    let path = config_path(path);
    match MirrorConfig::load(&path) {
        Err(MirrorError::Config(msg)) if msg.contains("Config file not found") => {
            Err(MirrorError::Config(format!(
                "No configuration found at {}. Run 'taskmirror init' first to create one.",
                path.display()
            )))
        }
        other => other,
    }
}

fn handle_init(path: Option<&str>, force: bool) -> Result<()> {
    let path = config_path(path);
    if path.exists() && !force {
        return Err(MirrorError::Config(format!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        )));
    }

    MirrorConfig::default().save(&path)?;
    println!("Created configuration at {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set jira.url and sync.projects in the config file");
    println!("  2. Export your API token: export JIRA_TOKEN=...");
    println!("  3. Check access: taskmirror check-auth");
    Ok(())
}

fn build_reconciler(config: &MirrorConfig) -> Result<(Arc<Reconciler>, Arc<JiraClient>)> {
    let store = MirrorStore::open(&config.database)?;
    let client = Arc::new(JiraClient::new(&config.jira)?);
    let reconciler = Reconciler::new(client.clone(), Arc::new(Mutex::new(store)))
        .with_fetch_timeout(config.sync.fetch_timeout());
    Ok((Arc::new(reconciler), client))
}

/// Log who we are authenticated as; startup continues either way
async fn log_identity(client: &JiraClient) {
    match client.verify_credentials().await {
        Ok(user) => tracing::info!(user = %user.display_name, "Authenticated with JIRA"),
        Err(e) => tracing::warn!(error = %e, "JIRA credential check failed"),
    }
}

async fn handle_check_auth(config: &MirrorConfig) -> Result<()> {
    let client = JiraClient::new(&config.jira)?;
    let user = client.verify_credentials().await?;

    println!("Authenticated as {}", user.display_name);
    if let Some(email) = &user.email {
        println!("  Email: {}", email);
    }
    println!("  API:   {}", client.base_url());
    Ok(())
}

async fn handle_sync(config: &MirrorConfig, keys: Vec<String>, json: bool) -> Result<()> {
    let keys = if keys.is_empty() {
        config.sync.projects.clone()
    } else {
        keys
    };
    if keys.is_empty() {
        return Err(MirrorError::Config(
            "No projects given and sync.projects is empty".to_string(),
        ));
    }

    let (reconciler, _) = build_reconciler(config)?;
    let results = reconciler.sync_projects(&keys).await;

    let mut failed = 0;
    for (key, result) in &results {
        match result {
            Ok(report) if json => println!("{}", serde_json::to_string(report)?),
            Ok(report) => println!(
                "{}: {} fetched, {} inserted, {} updated, {} deactivated ({} kept, {} skipped)",
                key,
                report.counts.fetched,
                report.counts.inserted,
                report.counts.updated,
                report.counts.deactivated,
                report.counts.touched,
                report.counts.skipped,
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", key, e);
            }
        }
    }

    if failed > 0 {
        return Err(MirrorError::Other(format!(
            "{} of {} project syncs failed",
            failed,
            results.len()
        )));
    }
    Ok(())
}

fn handle_list(
    config: &MirrorConfig,
    key: &str,
    status: Option<String>,
    all: bool,
    json: bool,
) -> Result<()> {
    taskmirror::mirror::validate_project_key(key)?;
    let store = MirrorStore::open(&config.database)?;

    let mut filter = IssueFilter::active();
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    if all {
        filter = filter.including_inactive();
    }

    let issues = store.list_issues(key, &filter)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
        return Ok(());
    }

    if issues.is_empty() {
        println!("No issues mirrored for {}", key);
        return Ok(());
    }

    for issue in &issues {
        let marker = if issue.is_active { " " } else { "x" };
        println!(
            "{} {:<12} {:<14} {:<20} {}",
            marker, issue.external_id, issue.status, issue.assignee, issue.summary
        );
    }

    if let Some(run) = store.last_successful_sync(key)? {
        println!();
        println!("Last successful sync: {}", run.started_at.to_rfc3339());
    }
    Ok(())
}

async fn handle_serve(config: &MirrorConfig, address: Option<String>) -> Result<()> {
    let (reconciler, client) = build_reconciler(config)?;
    log_identity(&client).await;

    let address = address.unwrap_or_else(|| config.server.address.clone());
    println!("Serving on http://{}", address);
    MirrorServer::new(reconciler).run(&address).await
}

/// Tick interval from `--interval` or the config file
fn daemon_interval(config: &MirrorConfig, secs: Option<u64>) -> Result<Duration> {
    let interval = secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.sync.interval());
    validate_interval(interval)
}

async fn handle_daemon(config: &MirrorConfig, interval: Option<u64>) -> Result<()> {
    if config.sync.projects.is_empty() {
        return Err(MirrorError::Config(
            "sync.projects is empty; nothing to sync".to_string(),
        ));
    }

    let interval = daemon_interval(config, interval)?;

    let (reconciler, client) = build_reconciler(config)?;
    log_identity(&client).await;

    let daemon_config = DaemonConfig::new(config.sync.projects.clone()).with_interval(interval);

    let mut daemon = SyncDaemon::new(daemon_config, reconciler);
    daemon.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_interval_rejects_zero() {
        let config = MirrorConfig::default();
        let err = daemon_interval(&config, Some(0)).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
        assert_eq!(
            daemon_interval(&config, Some(30)).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(daemon_interval(&config, None).unwrap(), config.sync.interval());
    }
}

//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{ClientCredentials, TokenProvider};
use crate::classifier::create_classifier;
use crate::client::{GraphMailboxClient, MailboxClient};
use crate::config::{Config, Requirement};
use crate::daemon::{run_daemon, DaemonSummary};
use crate::error::{LeadMachineError, Result};
use crate::llm::api_key_from_env;
use crate::models::{MailboxStatus, ProcessingStats};
use crate::pipeline::{FolderSetup, LeadPipeline};

#[derive(Parser, Debug)]
#[command(name = "leadmachine")]
#[command(version = "0.1.0")]
#[command(about = "Classifies mailbox messages as sales leads and routes them", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to environment file with credentials
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify and route messages in the source folder once
    Process {
        /// Classify only, don't forward or move anything
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of messages to process
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=1000))]
        limit: Option<u64>,
    },

    /// Process messages repeatedly until interrupted
    Daemon {
        /// Seconds between runs (defaults to daemon.interval_secs)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Move processed messages back to the source folder
    Restore {
        /// Restore every message in the archive folder
        #[arg(long)]
        all: bool,

        /// Number of most recent messages to restore
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,
    },

    /// Create the source and archive folders if they are missing
    Setup,

    /// Show folder counts and recently forwarded leads
    Status,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Load credentials from an env file when it exists
pub fn load_env_file(path: &Path) {
    if !path.exists() {
        debug!("No env file at {:?}, using process environment", path);
        return;
    }
    match dotenv::from_path(path) {
        Ok(()) => debug!("Loaded environment from {:?}", path),
        Err(e) => warn!("Failed to load env file {:?}: {}", path, e),
    }
}

/// Load the config file, apply environment overrides and check required settings
pub async fn load_config(path: &Path, requirement: Requirement) -> Result<Config> {
    let mut config = Config::load(path).await?;
    config.apply_env_overrides();
    config.validate()?;
    config.check_required(requirement)?;
    Ok(config)
}

/// Build the production mailbox client from configuration
pub fn build_mailbox_client(config: &Config) -> Result<Arc<dyn MailboxClient>> {
    let mailbox = &config.mailbox;
    let credentials = ClientCredentials::from_env(mailbox.tenant_id.clone())?;
    let tokens = TokenProvider::new(
        credentials,
        &mailbox.login_base,
        mailbox.scope.clone(),
        mailbox.request_timeout(),
    )?;
    let client = GraphMailboxClient::new(
        tokens,
        &mailbox.api_base,
        &mailbox.user_email,
        mailbox.request_timeout(),
    )?;
    Ok(Arc::new(client))
}

/// Build a pipeline for folder operations only
pub fn build_folder_pipeline(config: &Config) -> Result<LeadPipeline> {
    Ok(LeadPipeline::new(
        build_mailbox_client(config)?,
        config.folders.clone(),
    ))
}

/// Build a pipeline with the configured classifier attached
pub async fn build_lead_pipeline(config: &Config) -> Result<LeadPipeline> {
    let classifier = create_classifier(&config.classifier, api_key_from_env()).await?;
    Ok(build_folder_pipeline(config)?
        .with_classifier(classifier, config.mailbox.admin_emails.clone())
        .with_default_limit(config.processing.default_limit))
}

/// Cancellation token cancelled on Ctrl+C or SIGTERM
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Termination signal received");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

pub async fn run_process(cli: &Cli, dry_run: bool, limit: Option<u64>) -> Result<ProcessingStats> {
    let config = load_config(&cli.config, Requirement::Pipeline).await?;
    let progress = ProgressReporter::new();

    let spinner = progress.add_spinner("Preparing classifier...");
    let pipeline = build_lead_pipeline(&config).await?;
    progress.finish_spinner(&spinner, "Classifier ready");

    if dry_run {
        println!("Running in DRY RUN mode - nothing will be forwarded or moved");
    }

    let limit = limit.map(|l| l as usize);
    let stats = pipeline.process_emails(dry_run, limit).await?;
    print_stats(&stats, dry_run);
    Ok(stats)
}

pub async fn run_daemon_command(cli: &Cli, interval: Option<u64>) -> Result<DaemonSummary> {
    let config = load_config(&cli.config, Requirement::Pipeline).await?;
    let pipeline = build_lead_pipeline(&config).await?;
    let interval = Duration::from_secs(interval.unwrap_or(config.daemon.interval_secs));

    println!(
        "Daemon running, processing every {}s. Press Ctrl+C to stop.",
        interval.as_secs()
    );
    let summary = run_daemon(&pipeline, interval, shutdown_token()).await;

    println!("\nDaemon stopped");
    println!("  Iterations: {} ({} failed)", summary.iterations, summary.failed_iterations);
    println!("  {}", summary.totals);
    Ok(summary)
}

pub async fn run_restore(cli: &Cli, count: Option<u64>, all: bool) -> Result<usize> {
    let config = load_config(&cli.config, Requirement::Mailbox).await?;
    let pipeline = build_folder_pipeline(&config)?;

    if count.is_some() && all {
        warn!("Both --count and --all given, restoring --count messages");
    }

    let progress = ProgressReporter::new();
    let spinner = progress.add_spinner("Restoring messages...");
    let restored = pipeline
        .restore_emails(count.map(|c| c as usize), all)
        .await?;
    progress.finish_spinner(
        &spinner,
        &format!(
            "Restored {} message(s) to '{}'",
            restored, config.folders.source
        ),
    );
    Ok(restored)
}

pub async fn run_setup(cli: &Cli) -> Result<FolderSetup> {
    let config = load_config(&cli.config, Requirement::Mailbox).await?;
    let pipeline = build_folder_pipeline(&config)?;

    let setup = pipeline.ensure_folders().await?;
    if setup.created.is_empty() {
        println!("All folders already exist");
    } else {
        for name in &setup.created {
            println!("  + Created folder '{}'", name);
        }
    }
    println!(
        "Folders ready: {}/{}/{}",
        config.folders.inbox, config.folders.source, config.folders.archive
    );
    Ok(setup)
}

pub async fn run_status(cli: &Cli) -> Result<MailboxStatus> {
    let config = load_config(&cli.config, Requirement::Mailbox).await?;
    let pipeline = build_folder_pipeline(&config)?;

    let status = pipeline.mailbox_status().await?;
    println!("Mailbox: {}", config.mailbox.user_email);
    for folder in [&status.source, &status.archive] {
        println!(
            "  {:<16} {:>6} items ({} unread)",
            folder.display_name,
            folder
                .total_item_count
                .map_or_else(|| "?".to_string(), |c| c.to_string()),
            folder
                .unread_item_count
                .map_or_else(|| "?".to_string(), |c| c.to_string()),
        );
    }
    println!(
        "  Forwarded leads in the last {} sent items: {}",
        crate::pipeline::SENT_ITEMS_SCAN_SIZE,
        status.recent_forwarded_leads
    );
    Ok(status)
}

pub async fn run_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(LeadMachineError::ConfigError(format!(
            "{:?} already exists, use --force to overwrite",
            output
        )));
    }
    Config::create_example(output).await?;
    println!("Wrote example configuration to {:?}", output);
    println!("Set GRAPH_CLIENT_ID, GRAPH_CLIENT_SECRET, GRAPH_TENANT_ID and OPENAI_API_KEY in your .env file");
    Ok(())
}

fn print_stats(stats: &ProcessingStats, dry_run: bool) {
    println!();
    if dry_run {
        println!("Dry run summary (no changes made):");
    } else {
        println!("Summary:");
    }
    println!("  Processed: {}", stats.total_processed);
    println!(
        "  Leads {}: {}",
        if dry_run { "found" } else { "forwarded" },
        stats.leads_forwarded
    );
    println!("  Errors:    {}", stats.errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_process_flags() {
        let cli = Cli::try_parse_from(["leadmachine", "process", "--dry-run", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Process { dry_run, limit } => {
                assert!(dry_run);
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.env_file, PathBuf::from(".env"));
    }

    #[test]
    fn test_parse_rejects_zero_limit() {
        assert!(Cli::try_parse_from(["leadmachine", "process", "--limit", "0"]).is_err());
        assert!(Cli::try_parse_from(["leadmachine", "daemon", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_parse_restore_and_globals() {
        let cli = Cli::try_parse_from([
            "leadmachine",
            "--config",
            "custom.toml",
            "--verbose",
            "restore",
            "--count",
            "2",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Commands::Restore {
                all: false,
                count: Some(2)
            }
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_load_config_validates_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[mailbox]\nadmin_emails = [\"sales@acme.test\"]\n")
            .await
            .unwrap();

        std::env::set_var("ADMIN_EMAILS", "sales@acme.test,not-an-address");
        let result = load_config(&path, Requirement::Mailbox).await;
        std::env::remove_var("ADMIN_EMAILS");

        let message = result.unwrap_err().to_string();
        assert!(message.contains("mailbox.admin_emails contains an invalid address: 'not-an-address'"));
    }

    #[tokio::test]
    async fn test_init_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        run_init_config(&path, false).await.unwrap();
        assert!(run_init_config(&path, false).await.is_err());
        assert!(run_init_config(&path, true).await.is_ok());
    }
}

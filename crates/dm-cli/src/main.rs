//! DevManager CLI
//!
//! Single binary for all DevManager operations:
//! - Launch (first-run install, self-update, worker update, token handoff)
//! - Detached self-update helper (`apply-update`, hidden)
//! - Management commands (check, status, token, config)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use devmanager::commands;
use devmanager::logging::{self, HELPER_LOG_FILE, RUN_LOG_FILE};
use devmanager::output::{print_error, ConsoleObserver};
use devmanager::{ExitStatus, Orchestrator};
use dm_core::config::{self, ConfigFile};
use dm_core::{TokenService, Version};
use dm_update::{GithubFeed, ReleaseFeed};

#[derive(Parser)]
#[command(name = "devmanager")]
#[command(author, version, about = "Self-updating launcher for DevAutomator")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Redeem a handoff token and enter developer mode
    #[arg(long = "token", id = "dev_token", value_name = "TOKEN")]
    dev_token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the release feed for updates without installing
    Check,

    /// Show installed versions and backups
    Status,

    /// Manage handoff tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Finish a staged self-update (started by the launcher)
    #[command(hide = true)]
    ApplyUpdate {
        /// Update plan written by the launcher
        #[arg(long)]
        plan: PathBuf,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Mint a new token (invalidates any previous one)
    Mint,
    /// Check a token without using it up
    Verify { token: String },
    /// Validate and consume a token
    Redeem { token: String },
    /// Delete the stored token
    Revoke,
    /// Show the stored token's state
    Info,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        None => Some(RUN_LOG_FILE),
        Some(Commands::ApplyUpdate { .. }) => Some(HELPER_LOG_FILE),
        Some(_) => None,
    }
    .map(|name| config_dir(cli.config.as_ref()).join(name));
    logging::init(cli.quiet, cli.verbose, log_file.as_deref());

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let status = match run(cli, cancel.clone()).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{:#}", e);
            print_error(&format!("{:#}", e));
            ExitStatus::Failure
        }
    };

    let status = if cancel.is_cancelled() {
        ExitStatus::Interrupted
    } else {
        status
    };
    std::process::exit(status.code());
}

/// Loaded configuration and the services built from it
struct Runtime {
    config: ConfigFile,
    tokens: TokenService,
    running_version: Version,
}

impl Runtime {
    fn load(config_path: Option<&std::path::Path>) -> Result<Self> {
        let config =
            ConfigFile::load_or_default(config_path).context("Failed to load configuration")?;
        config.validate().context("Invalid configuration")?;
        let running_version =
            Version::parse(env!("CARGO_PKG_VERSION")).context("Invalid package version")?;
        Ok(Self {
            tokens: TokenService::new(config.token.token_path()),
            config,
            running_version,
        })
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<ExitStatus> {
    if let Some(token) = &cli.dev_token {
        let rt = Runtime::load(cli.config.as_deref())?;
        return Ok(commands::developer_mode(
            &rt.config,
            &rt.tokens,
            token,
            &rt.running_version,
        ));
    }

    match cli.command {
        None => {
            let rt = Runtime::load(cli.config.as_deref())?;
            let feed = build_feed(&rt.config)?;
            let mut orchestrator = Orchestrator::new(rt.config, feed, rt.tokens)
                .with_cancellation(cancel)
                .with_launcher_version(rt.running_version);
            if !cli.quiet {
                orchestrator = orchestrator.with_observer(Arc::new(ConsoleObserver::new()));
            }
            orchestrator.run().await
        }

        Some(Commands::Check) => {
            let rt = Runtime::load(cli.config.as_deref())?;
            let feed = build_feed(&rt.config)?;
            commands::check_command(&rt.config, feed).await;
            Ok(ExitStatus::Success)
        }

        Some(Commands::Status) => {
            let rt = Runtime::load(cli.config.as_deref())?;
            commands::status_command(&rt.config, &rt.running_version);
            Ok(ExitStatus::Success)
        }

        Some(Commands::Token { action }) => {
            let tokens = Runtime::load(cli.config.as_deref())?.tokens;
            match action {
                TokenAction::Mint => commands::token_mint(&tokens),
                TokenAction::Verify { token } => commands::token_verify(&tokens, &token),
                TokenAction::Redeem { token } => commands::token_redeem(&tokens, &token),
                TokenAction::Revoke => commands::token_revoke(&tokens),
                TokenAction::Info => commands::token_info(&tokens),
            }
        }

        // Works on the raw file, so a broken config can still be repaired
        Some(Commands::Config { action }) => config_command(cli.config.as_ref(), action),

        Some(Commands::ApplyUpdate { plan }) => commands::apply_update_command(&plan).await,
    }
}

fn config_command(path: Option<&PathBuf>, action: ConfigAction) -> Result<ExitStatus> {
    match action {
        ConfigAction::Show => commands::config_show(path)?,
        ConfigAction::Get { key } => {
            if !commands::config_get(path, &key)? {
                return Ok(ExitStatus::Failure);
            }
        }
        ConfigAction::Set { key, value } => commands::config_set(path, &key, &value)?,
        ConfigAction::Init { force } => commands::config_init(path, force)?,
        ConfigAction::Path => commands::config_path(path),
    }
    Ok(ExitStatus::Success)
}

fn build_feed(config: &ConfigFile) -> Result<Arc<dyn ReleaseFeed>> {
    let feed = GithubFeed::new(&config.feed).context("Failed to create release feed client")?;
    Ok(Arc::new(feed))
}

/// Directory holding the config file (and the log files)
fn config_dir(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .and_then(|p| p.parent().map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(config::default_config_dir)
}

/// Cancel `cancel` on Ctrl-C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::debug!("SIGTERM handler unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel.cancel();
    });
}

//! Command-line interface for tidywatch.
//!
//! This module handles:
//! - Argument parsing
//! - Merging command-line overrides into the loaded configuration
//! - Running the monitor in the foreground until Ctrl+C

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::monitor::MonitorManager;
use crate::output::{ConsoleLog, OutputFormatter};

/// Watch folders and sort new files into category subdirectories.
///
/// Files that appear directly in a watched directory are moved into a
/// subfolder named after their category (Images, Documents, ...), chosen by
/// extension. Name clashes get a " (n)" suffix; nothing is overwritten.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "tidywatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
EXAMPLES:
    # Watch the directories from the configuration (default: ~/Downloads)
    tidywatch

    # Watch specific directories, organizing what is already there first
    tidywatch ~/Downloads ~/Desktop --sweep

    # Show what would happen without moving anything
    tidywatch ~/Downloads --dry-run

    # Write a starter configuration
    tidywatch --init-config ~/.config/tidywatch/config.toml
")]
pub struct Cli {
    /// Directories to watch. Replaces the configured list when given.
    #[arg(value_name = "DIR")]
    pub directories: Vec<PathBuf>,

    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Milliseconds a new file must stay quiet before it is moved.
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Also organize files already present when watching starts.
    #[arg(long)]
    pub sweep: bool,

    /// Report intended moves without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the default configuration to PATH and exit.
    #[arg(long, value_name = "PATH")]
    pub init_config: Option<PathBuf>,
}

impl Cli {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if !self.directories.is_empty() {
            config.directories = self.directories.clone();
        }
        if let Some(settle_ms) = self.settle_ms {
            config.settle_ms = settle_ms;
        }
        if self.sweep {
            config.sweep_existing = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
    }

    /// Loads the configuration this invocation should run with.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is given or found but cannot
    /// be read or parsed.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config =
            Config::load(self.config.as_deref()).context("failed to load configuration")?;
        self.apply_overrides(&mut config);
        Ok(config)
    }
}

/// Runs the CLI until interrupted.
///
/// # Errors
///
/// Returns an error for invalid configuration, when there is nothing to
/// watch, or when the Ctrl+C handler cannot be installed.
pub fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.init_config {
        Config::write_default(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        OutputFormatter::success(&format!(
            "wrote default configuration to {}",
            path.display()
        ));
        return Ok(());
    }

    let config = cli.resolve_config()?;
    let rules = config.rules().context("invalid category table")?;
    let settings = config.watch_settings().context("invalid settings")?;

    if config.directories.is_empty() {
        bail!(
            "no directories to watch; pass them as arguments or set `directories` in the configuration"
        );
    }

    let console = ConsoleLog::new();
    let mut manager = MonitorManager::with_settings(console.logger(), settings);
    manager.start(&config.directories, rules);

    let watching = manager.watched_directories().len();
    if watching == 0 {
        manager.stop();
        bail!("none of the configured directories could be watched");
    }
    if manager.settings().dry_run {
        OutputFormatter::warning("dry run: files are reported, never moved");
    }
    console.set_watching(watching);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime.block_on(wait_for_shutdown())?;

    info!("Shutdown signal received");
    manager.stop();
    console.finish();
    Ok(())
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = signal::ctrl_c() => result.context("failed to install Ctrl+C handler"),
        result = terminate => result,
    }
}

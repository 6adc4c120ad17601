//! driftd — the Drift daemon.
//!
//! Single binary that assembles the Drift subsystems:
//! - State store (redb)
//! - Cluster gateway client
//! - Operation tracker + topology reconciler
//! - Automation runner
//! - REST API
//!
//! # Usage
//!
//! ```text
//! driftd serve --config /etc/drift/drift.toml
//! driftd check-window --config /etc/drift/drift.toml --at 2024-01-06T22:30:00Z
//! driftd migrate --config /etc/drift/drift.toml --guest 101 --source pve1 --target pve2
//! ```

mod commands;
mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use drift_core::{DriftConfig, GuestKind, GuestId};

#[derive(Parser)]
#[command(name = "driftd", about = "Drift guest relocation daemon")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: tracker, reconciler, automation and REST API.
    Serve,

    /// Evaluate the migration schedule and print the decision.
    CheckWindow {
        /// RFC 3339 instant to evaluate; defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Submit one migration and follow it to a terminal state.
    Migrate {
        #[arg(long)]
        guest: GuestId,

        /// vm or container.
        #[arg(long, default_value = "vm")]
        kind: GuestKind,

        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DriftConfig> {
    match path {
        Some(path) => DriftConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("load config {}: {e}", path.display())),
        None => Ok(DriftConfig::default()),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,driftd=debug,drift=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve::run(config).await,
        Command::CheckWindow { at } => commands::check_window(&config, at.as_deref()),
        Command::Migrate {
            guest,
            kind,
            source,
            target,
        } => commands::migrate(&config, guest, kind, &source, &target).await,
    }
}

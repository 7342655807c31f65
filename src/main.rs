//! checkd daemon binary
//!
//! # Usage
//!
//! ```bash
//! checkd --project-root ~/src/app
//! checkd --project-root ~/src/app --watch-root ~/src/app --emit-events
//! checkd --load-saved-state state.bin --changed-files changed.txt
//! ```
//!
//! Logs go to stderr; stdout carries lifecycle events when enabled.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use checkd::server::{EventEmitter, ShutdownReason, Supervisor};
use checkd::{Cli, Collaborators, DaemonError};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("checkd=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(reason) => {
            tracing::info!(?reason, "exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<DaemonError>() {
                Some(daemon) => daemon.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ShutdownReason> {
    let config = cli.configuration()?;

    let collaborators = Collaborators::standard(&config);
    let events = if config.emit_events {
        EventEmitter::stdout()
    } else {
        EventEmitter::disabled()
    };

    tracing::info!(
        project = %config.project_root.display(),
        log_path = %config.log_path.display(),
        "starting checkd"
    );
    let reason = Supervisor::new(config, collaborators, events).run().await?;
    Ok(reason)
}

//! dirpack: push directories to, and pull them from, OCI registries.

// The binary is the one place allowed to write to stdout
#![allow(clippy::print_stdout)]

mod cli;
mod commands;
mod tracing;

use crate::cli::parse;
use crate::tracing::{TracingConfig, init_tracing};
use ::tracing::{info, warn};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = parse();

    init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.log_level.into(),
    })?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    commands::execute(cli, token).await
}

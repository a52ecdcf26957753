//! # SkinLens Backend - Main Entry Point

use clap::Parser;
use skinlens_backend::BackendCliOptions;
use skinlens_shared::Result;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_opts = BackendCliOptions::parse();
    cli_opts.logging.init_logging()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting SkinLens Backend"
    );

    let outcome = cli_opts.run().await;
    if let Err(e) = &outcome {
        error!(error = %e, fatal = e.is_fatal(), "Backend exited with an error");
    }
    outcome
}

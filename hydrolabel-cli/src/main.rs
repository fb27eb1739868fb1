//! hydrolabel - labeling and verification tooling for hydrophone
//! spectrogram data
//!
//! Validates, converts, inspects and updates unified prediction/
//! verification documents from the command line.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use hydrolabel_cli::Cli;

fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Log build identification immediately after tracing init
    info!(
        "hydrolabel v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    hydrolabel_cli::run(Cli::parse())
}

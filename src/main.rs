//! instrumented-tests - Android instrumented tests on a throwaway emulator
//!
//! Creates a fresh AVD, boots it, runs the Gradle test task against it and
//! tears everything down again, even when the run fails or is interrupted.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use instrumented_tests::commands::RunCommand;
use instrumented_tests::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "instrumented-tests", version)]
#[command(about = "Run Android instrumented tests against a throwaway emulator")]
struct Cli {
    #[command(flatten)]
    run: RunCommand,
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    let cli = Cli::parse();
    info!("{} v{} starting...", APP_NAME, VERSION);

    // Ctrl-C aborts the boot wait or test task; teardown still runs
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting the emulator down...");
            interrupt.cancel();
        }
    });

    match cli.run.execute(cancel).await {
        Ok(report) => {
            info!("Instrumented tests passed ({} lines of output)", report.output.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::from(e.exit_code() as u8))
        }
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use fhe_bridge_cli::{execute, telemetry, Cli};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // Keep the guard alive so the file writer flushes on exit
    let _file_guard = telemetry::setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!(
        target = "fhe_bridge_cli",
        event = "fhe-bridge-start",
        command = ?cli.command,
        "Running command"
    );

    match execute(cli).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            info!(
                target = "fhe_bridge_cli",
                event = "fhe-bridge-stop",
                "Command completed"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                target = "fhe_bridge_cli",
                event = "fhe-bridge-error",
                error = %e,
                "Command failed"
            );
            Err(e)
        }
    }
}

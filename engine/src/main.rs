// plugd plugin host
// Main entry point for the plugd binary

use clap::Parser;
use plugd_engine::cli::{Cli, Command};
use plugd_engine::config::Config;
use plugd_engine::handlers::{handle_run, handle_scan, handle_verify, OutputFormat};
use plugd_engine::telemetry::{init_telemetry_with_format, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_default()?
    };

    // --log overrides the configured level; RUST_LOG overrides both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    let log_format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::default()
    };
    init_telemetry_with_format(log_level, log_format);

    tracing::debug!("plugd v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Scan { paths } => handle_scan(paths, &config, format).await,
        Command::Verify { dir } => handle_verify(dir, &config, format).await,
        Command::Run { paths } => handle_run(paths, &config, format).await,
    }
}

use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use whistle_core::config::{AppConfig, LoadOptions, LogFormat};

/// Logs go to stderr; stdout carries the command's JSON result.
fn init_logging(config: &AppConfig) -> Result<()> {
    use tracing::Level;

    let log_level = config
        .logging
        .level
        .parse::<Level>()
        .with_context(|| format!("invalid log level `{}`", config.logging.level))?;
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!(error))
    .context("failed to install tracing subscriber")
}

fn main() -> ExitCode {
    // Config errors are reported by the command itself as structured output.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("logging disabled: {error:#}");
        }
    }
    whistle_cli::run()
}

use anyhow::{Context, Result};
use clap::Parser;
use signal_vault_lib::config::Settings;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Archive Signal group messages into a markdown vault")]
struct Cli {
    /// YAML settings file; defaults are used when it does not exist
    #[arg(short, long, value_name = "FILE", default_value = "signal-vault.yaml")]
    config: PathBuf,

    /// Write JSON logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    let log_dir = cli.log_dir.clone().or_else(|| settings.log_dir.clone());
    signal_vault_lib::init_tracing(log_dir.as_deref(), &settings.log_level)
        .map_err(anyhow::Error::msg)
        .context("initialising logging")?;

    signal_vault_lib::run(settings).await.context("signal-vault stopped")?;
    Ok(())
}

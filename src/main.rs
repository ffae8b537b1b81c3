//! CLI entry point for the illustration downloader.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod app_config;
mod cli;
mod commands;
mod progress_ui;

use app_config::VerbositySetting;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let loaded = app_config::load_default_file_config()?;
    let file_config = loaded.config_or_default();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = resolve_log_level(cli.quiet, cli.verbose, file_config.verbosity);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");
    if let Some(path) = &loaded.path {
        debug!(
            path = %path.display(),
            loaded = loaded.loaded_from_file,
            verbosity = file_config.verbosity.map(VerbositySetting::as_str),
            "Config file resolved"
        );
    }

    let db_path = cli
        .db
        .clone()
        .or_else(|| file_config.database.clone())
        .unwrap_or_else(app_config::resolve_default_database_path);

    match &cli.command {
        Command::Download(args) => {
            info!("Illust downloader starting");
            commands::run_download_command(args, &file_config, &db_path, cli.quiet).await
        }
        Command::Log(args) => commands::run_log_command(args, &db_path).await,
    }
}

fn resolve_log_level(quiet: bool, verbose: u8, config: Option<VerbositySetting>) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => config.map_or("info", VerbositySetting::log_level),
        1 => "debug",
        _ => "trace",
    }
}

//! Log command handler: show recent run outcomes.

use std::path::Path;

use anyhow::{Context, Result};
use illust_core::history::ExecutionEntry;
use illust_core::{Database, DownloadHistory};

use crate::cli::LogArgs;

pub async fn run_log_command(args: &LogArgs, db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        println!("No download history found at {}.", db_path.display());
        return Ok(());
    }

    let db = Database::new(db_path)
        .await
        .with_context(|| format!("Failed to open history database '{}'", db_path.display()))?;
    let history = DownloadHistory::new(db);
    let entries = history
        .recent_executions(args.limit)
        .await
        .context("Failed to query execution log")?;

    if entries.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", render_entry(entry));
    }
    Ok(())
}

fn render_entry(entry: &ExecutionEntry) -> String {
    let status = entry
        .status()
        .map_or_else(|_| entry.status_str.clone(), |status| status.to_string());
    let message = entry.message.as_deref().unwrap_or("-");
    format!(
        "{}  {:<7}  {:<12}  {}  {}",
        entry.executed_at, status, entry.item_type, entry.tag, message
    )
}

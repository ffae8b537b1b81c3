//! Download command handler: plan, download, record the run outcome.

use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use illust_core::download::DEFAULT_PAGE_CONCURRENCY;
use illust_core::{
    CandidateItem, Database, DownloadHistory, DownloadPipeline, DownloadPlanner, ExecutionStatus,
    FilterCriteria, HttpClient, ItemDownloader, ItemType, LimiterConfig, PipelineConfig,
    PipelineError, PipelineResult, RunOutcome,
};
use tracing::{debug, info, warn};

use crate::app_config::FileConfig;
use crate::cli::DownloadArgs;
use crate::progress_ui::BarProgressReporter;

/// Effective run settings after merging CLI flags over file config.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DownloadSettings {
    output_dir: PathBuf,
    pipeline: PipelineConfig,
    limiter: LimiterConfig,
    page_concurrency: usize,
}

impl DownloadSettings {
    /// CLI values win over file values, file values win over defaults.
    fn resolve(args: &DownloadArgs, file: &FileConfig) -> Self {
        let mut pipeline = PipelineConfig::default();
        if let Some(concurrency) = args.concurrency.or(file.concurrency) {
            pipeline.concurrency = usize::from(concurrency);
        }
        if let Some(max_retries) = args.max_retries.or(file.max_retries) {
            pipeline.max_retries = u32::from(max_retries);
        }

        let mut limiter = LimiterConfig::default();
        if let Some(delay_ms) = args.request_delay.or(file.request_delay) {
            limiter.request_delay = Duration::from_millis(delay_ms);
        }
        if let Some(dynamic) = file.dynamic_concurrency {
            limiter.dynamic_concurrency = dynamic;
        }
        if let Some(min) = file.min_concurrency {
            limiter.min_concurrency = usize::from(min);
        }

        Self {
            output_dir: args
                .output_dir
                .clone()
                .or_else(|| file.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            pipeline,
            limiter,
            page_concurrency: file
                .page_concurrency
                .map_or(DEFAULT_PAGE_CONCURRENCY, usize::from),
        }
    }
}

fn criteria_from_args(args: &DownloadArgs) -> FilterCriteria {
    FilterCriteria {
        min_bookmarks: args.min_bookmarks,
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        limit: args.limit,
        random_selection: args.random,
        tag: args.tag.clone(),
    }
}

/// Reads the candidates file (a JSON array of items).
fn read_candidates(path: &Path) -> Result<Vec<CandidateItem>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read candidates file '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse candidates file '{}'", path.display()))
}

fn spawn_interrupt_listener() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });
    interrupted
}

fn summary_message(result: &PipelineResult, outcome: RunOutcome) -> String {
    format!(
        "{outcome}: downloaded {} of {} (skipped {}, already downloaded {}, filtered out {})",
        result.downloaded,
        result.limit,
        result.skipped,
        result.already_downloaded,
        result.filtered_out
    )
}

pub async fn run_download_command(
    args: &DownloadArgs,
    file_config: &FileConfig,
    db_path: &Path,
    quiet: bool,
) -> Result<()> {
    let settings = DownloadSettings::resolve(args, file_config);
    debug!(?settings, "download settings resolved");

    let items = read_candidates(&args.input)?;
    let item_type = ItemType::from(args.item_type);
    let criteria = criteria_from_args(args);
    let tag = criteria.tag_or_unknown().to_string();
    info!(candidates = items.len(), %item_type, tag = %tag, "Loaded candidates");

    let db = Database::new(db_path)
        .await
        .with_context(|| format!("Failed to open history database '{}'", db_path.display()))?;
    let history = DownloadHistory::new(db);

    let downloader = ItemDownloader::new(HttpClient::new(), &settings.output_dir, item_type)
        .with_history(history.clone())
        .with_page_concurrency(settings.page_concurrency)
        .with_limiter_config(settings.limiter);

    let planner = DownloadPlanner::new(Arc::new(history.clone()));
    let mut pipeline = DownloadPipeline::new(planner, settings.pipeline)
        .with_interrupt(spawn_interrupt_listener());

    let show_bar = args.progress && !quiet && io::stderr().is_terminal();
    let bar = show_bar.then(BarProgressReporter::new);
    if let Some(bar) = &bar {
        pipeline = pipeline.with_progress(Arc::new(bar.clone()));
    }

    let run = pipeline.run(items, &criteria, item_type, &downloader).await;
    if let Some(bar) = &bar {
        bar.finish();
    }

    let assessed = run.and_then(|result| result.assess().map(|outcome| (result, outcome)));
    match assessed {
        Ok((result, outcome)) => {
            let message = summary_message(&result, outcome);
            history
                .log_execution(&tag, item_type, ExecutionStatus::Success, Some(&message))
                .await
                .context("Failed to record run outcome")?;
            info!(
                outcome = %outcome,
                downloaded = result.downloaded,
                skipped = result.skipped,
                limit = result.limit,
                "Download complete"
            );
            Ok(())
        }
        Err(error) => {
            let message = error.to_string();
            if let Err(log_error) = history
                .log_execution(&tag, item_type, ExecutionStatus::Failed, Some(&message))
                .await
            {
                warn!(error = %log_error, "Failed to record run outcome");
            }
            Err(run_failure(error, &tag))
        }
    }
}

fn run_failure(error: PipelineError, tag: &str) -> anyhow::Error {
    anyhow::Error::new(error).context(format!("Download run for '{tag}' failed"))
}

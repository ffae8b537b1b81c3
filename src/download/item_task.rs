//! Default per-item download task.
//!
//! [`ItemDownloader`] fetches every page of one item through an
//! [`AdaptiveLimiter`], writes each page to `<output>/<id>_p<n>.<ext>` and
//! records the saved files in the [`DownloadHistory`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::error::TaskError;
use super::limiter::{AdaptiveLimiter, LimiterConfig};
use crate::history::{DownloadHistory, NewDownload};
use crate::item::{CandidateItem, ItemType};

/// The per-item download operation invoked by the pipeline.
///
/// Failures flow into the recovery policy, so implementations must report
/// them in the [`TaskError`] taxonomy.
#[async_trait]
pub trait DownloadTask: Send + Sync {
    /// Downloads one item under the run label `tag`.
    async fn download_item(&self, item: &CandidateItem, tag: &str) -> Result<(), TaskError>;
}

/// Default number of pages fetched concurrently for one item.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 3;

/// Files saved for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedItem {
    /// Remote item id.
    pub item_id: u64,
    /// Saved page files in page order.
    pub files: Vec<PathBuf>,
    /// Pages that failed and were left out.
    pub failed_pages: usize,
}

/// Downloads all pages of an item.
#[derive(Debug, Clone)]
pub struct ItemDownloader {
    client: HttpClient,
    output_dir: PathBuf,
    item_type: ItemType,
    history: Option<DownloadHistory>,
    page_concurrency: usize,
    limiter_config: LimiterConfig,
}

impl ItemDownloader {
    /// Creates a downloader writing into `output_dir`.
    #[must_use]
    pub fn new(client: HttpClient, output_dir: impl Into<PathBuf>, item_type: ItemType) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            item_type,
            history: None,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
            limiter_config: LimiterConfig::default(),
        }
    }

    /// Records saved files in `history`.
    #[must_use]
    pub fn with_history(mut self, history: DownloadHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Sets the per-item page concurrency (at least 1).
    #[must_use]
    pub fn with_page_concurrency(mut self, page_concurrency: usize) -> Self {
        self.page_concurrency = page_concurrency.max(1);
        self
    }

    /// Sets pacing and adaptation for page requests.
    #[must_use]
    pub fn with_limiter_config(mut self, limiter_config: LimiterConfig) -> Self {
        self.limiter_config = limiter_config;
        self
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Downloads every page of `item`.
    ///
    /// A partial download (some pages failed) still counts as success.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] when the item has no pages
    /// - the first page error when every page failed
    /// - [`TaskError::Fatal`] when the output directory or the history cannot
    ///   be written
    #[instrument(skip(self, item), fields(item_id = item.id, pages = item.pages.len()))]
    pub async fn download(
        &self,
        item: &CandidateItem,
        tag: &str,
    ) -> Result<DownloadedItem, TaskError> {
        if item.pages.is_empty() {
            let message = format!("item {} has no pages", item.id);
            return Err(TaskError::not_found(message));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            let message = format!("failed to create {}", self.output_dir.display());
            return Err(TaskError::fatal_with_source(message, e));
        }

        let concurrency = self.page_concurrency.min(item.pages.len());
        let limiter = AdaptiveLimiter::new(concurrency, self.limiter_config);
        let results = limiter
            .process(item.pages.clone(), |url, page| async move {
                self.download_page(item.id, page, &url).await
            })
            .await;

        let total = results.len();
        let mut files = Vec::with_capacity(total);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(path) => files.push(path),
                Err(error) => {
                    debug!(item_id = item.id, error = %error, "page failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if files.is_empty() {
            let no_files = || TaskError::fatal(format!("item {} produced no files", item.id));
            return Err(first_error.unwrap_or_else(no_files));
        }

        let failed_pages = total - files.len();
        if failed_pages > 0 {
            warn!(
                item_id = item.id,
                saved = files.len(),
                failed = failed_pages,
                "partial download"
            );
        }

        if let Some(history) = &self.history {
            for file in &files {
                let record = NewDownload {
                    item_id: item.id,
                    item_type: self.item_type,
                    tag,
                    title: item.title.as_deref(),
                    file_path: file,
                };
                if let Err(e) = history.record_download(&record).await {
                    return Err(TaskError::fatal_with_source("failed to record download", e));
                }
            }
        }

        info!(item_id = item.id, files = files.len(), "item downloaded");
        Ok(DownloadedItem {
            item_id: item.id,
            files,
            failed_pages,
        })
    }

    async fn download_page(
        &self,
        item_id: u64,
        page: usize,
        url: &str,
    ) -> Result<PathBuf, TaskError> {
        let resource = self.client.fetch(url).await?;
        let extension = page_extension(url, resource.content_type.as_deref());
        let file_name = format!("{item_id}_p{page}.{extension}");
        let path = self.output_dir.join(file_name);
        if let Err(e) = tokio::fs::write(&path, &resource.body).await {
            let message = format!("failed to write {}", path.display());
            return Err(TaskError::fatal_with_source(message, e));
        }
        debug!(path = %path.display(), bytes = resource.body.len(), "page saved");
        Ok(path)
    }
}

#[async_trait]
impl DownloadTask for ItemDownloader {
    async fn download_item(&self, item: &CandidateItem, tag: &str) -> Result<(), TaskError> {
        self.download(item, tag).await.map(|_| ())
    }
}

/// Picks a file extension from the URL path, then the content type.
fn page_extension(url: &str, content_type: Option<&str>) -> &'static str {
    let from_url = url::Url::parse(url).ok().and_then(|parsed| {
        let segment = parsed.path_segments()?.next_back()?.to_string();
        let (_, ext) = segment.rsplit_once('.')?;
        known_extension(&ext.to_ascii_lowercase())
    });
    from_url
        .or_else(|| content_type.map(extension_from_content_type))
        .unwrap_or("bin")
}

fn known_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        "txt" => Some("txt"),
        "html" | "htm" => Some("html"),
        "json" => Some("json"),
        "zip" => Some("zip"),
        _ => None,
    }
}

fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "text/plain" => "txt",
        "text/html" => "html",
        "application/json" => "json",
        "application/zip" => "zip",
        _ => "bin",
    }
}

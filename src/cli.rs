//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use illust_core::ItemType;

/// Plan and download illustrations and novels.
///
/// Reads discovery candidates (search or ranking results) from a JSON file,
/// filters them, skips what was already downloaded and fetches the rest.
#[derive(Parser, Debug)]
#[command(name = "illust-downloader")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// History database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan and download items from a candidates file
    Download(DownloadArgs),

    /// Show recent run outcomes
    Log(LogArgs),
}

/// Item type selector for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ItemTypeArg {
    /// Illustrations (multi-page images)
    #[value(alias = "illust")]
    Illustration,
    /// Novels
    Novel,
}

impl From<ItemTypeArg> for ItemType {
    fn from(value: ItemTypeArg) -> Self {
        match value {
            ItemTypeArg::Illustration => Self::Illustration,
            ItemTypeArg::Novel => Self::Novel,
        }
    }
}

/// Arguments for the `download` command.
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// JSON file with an array of candidate items
    #[arg(short, long)]
    pub input: PathBuf,

    /// Kind of items in the candidates file
    #[arg(short = 't', long = "type", value_enum, default_value_t = ItemTypeArg::Illustration)]
    pub item_type: ItemTypeArg,

    /// Label for this run (search keyword or ranking mode)
    #[arg(long)]
    pub tag: Option<String>,

    /// Number of items to download (0 uses the default of 10)
    #[arg(short = 'n', long, default_value_t = 0)]
    pub limit: usize,

    /// Pick items at random instead of in order
    #[arg(long)]
    pub random: bool,

    /// Skip items with fewer bookmarks
    #[arg(long)]
    pub min_bookmarks: Option<u64>,

    /// Earliest creation date, YYYY-MM-DD (inclusive)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Latest creation date, YYYY-MM-DD (inclusive)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Maximum concurrent item downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum attempts per item for transient failures (0-10, 0 means a single attempt)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Minimum delay between page requests in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub request_delay: Option<u64>,

    /// Directory to write downloaded files into
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Show a progress bar instead of progress log lines
    #[arg(long)]
    pub progress: bool,
}

/// Arguments for the `log` command.
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Number of entries to show (1-1000)
    #[arg(short = 'n', long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub limit: u32,
}

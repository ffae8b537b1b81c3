//! CLI command handlers.

mod download;
mod log;

pub use download::run_download_command;
pub use log::run_log_command;

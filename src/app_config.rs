//! Defaults read from the user's config file.
//!
//! The file is a flat `key = value` list (a TOML subset): strings are
//! double-quoted, numbers and booleans are bare, `#` starts a comment.
//! Every key is optional; CLI flags override whatever is set here.

use std::env;
use std::fmt::Display;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};

const APP_DIR_NAME: &str = "illust-downloader";
const CONFIG_FILE_NAME: &str = "config.toml";
const HISTORY_FILE_NAME: &str = "history.db";

const CONCURRENCY_RANGE: RangeInclusive<u8> = 1..=100;
const MAX_RETRIES_RANGE: RangeInclusive<u8> = 0..=10;
const REQUEST_DELAY_RANGE: RangeInclusive<u64> = 0..=60_000;
const PAGE_CONCURRENCY_RANGE: RangeInclusive<u8> = 1..=20;

/// Download defaults from `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Directory saved pages land in.
    pub output_dir: Option<PathBuf>,
    /// History database path.
    pub database: Option<PathBuf>,
    /// Items downloaded in parallel.
    pub concurrency: Option<u8>,
    /// Retries per item after the first attempt.
    pub max_retries: Option<u8>,
    /// Milliseconds between page requests.
    pub request_delay: Option<u64>,
    /// Shrink page concurrency when the remote rate limits.
    pub dynamic_concurrency: Option<bool>,
    /// Floor for the adaptive page concurrency.
    pub min_concurrency: Option<u8>,
    /// Pages fetched concurrently for one item.
    pub page_concurrency: Option<u8>,
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Checks every set value against the range the CLI accepts.
    ///
    /// # Errors
    ///
    /// Names the first offending key.
    pub fn validate(&self) -> Result<()> {
        check_range("concurrency", self.concurrency, &CONCURRENCY_RANGE)?;
        check_range("max_retries", self.max_retries, &MAX_RETRIES_RANGE)?;
        check_range("request_delay", self.request_delay, &REQUEST_DELAY_RANGE)?;
        check_range(
            "min_concurrency",
            self.min_concurrency,
            &PAGE_CONCURRENCY_RANGE,
        )?;
        check_range(
            "page_concurrency",
            self.page_concurrency,
            &PAGE_CONCURRENCY_RANGE,
        )?;

        if let (Some(floor), Some(pages)) = (self.min_concurrency, self.page_concurrency)
            && floor > pages
        {
            bail!(
                "Invalid config value for `min_concurrency`: {floor}. Must not exceed `page_concurrency` ({pages})"
            );
        }
        Ok(())
    }
}

fn check_range<T>(key: &str, value: Option<T>, range: &RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + Display,
{
    match value {
        Some(value) if !range.contains(&value) => bail!(
            "Invalid config value for `{key}`: {value}. Expected range: {}..={}",
            range.start(),
            range.end()
        ),
        _ => Ok(()),
    }
}

/// Verbosity labels accepted in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// Tracing filter directive for this setting.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Quiet => "error",
        }
    }
}

impl FromStr for VerbositySetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let known = [Self::Default, Self::Verbose, Self::Quiet, Self::Debug];
        match known.into_iter().find(|setting| setting.as_str() == s) {
            Some(setting) => Ok(setting),
            None => bail!("Unknown verbosity '{s}' (default, verbose, quiet or debug)"),
        }
    }
}

/// Outcome of looking for the default config file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Where the file was looked for, when a base directory is known.
    pub path: Option<PathBuf>,
    pub config: Option<FileConfig>,
    pub loaded_from_file: bool,
}

impl LoadedConfig {
    /// The file config, or an empty one when nothing was loaded.
    #[must_use]
    pub fn config_or_default(&self) -> FileConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// `$XDG_CONFIG_HOME/illust-downloader/config.toml`, falling back to
/// `$HOME/.config/illust-downloader/config.toml`.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    app_dir("XDG_CONFIG_HOME", &[".config"]).map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// `$XDG_DATA_HOME/illust-downloader/history.db`, falling back to
/// `$HOME/.local/share/illust-downloader/history.db`, then `./history.db`.
#[must_use]
pub fn resolve_default_database_path() -> PathBuf {
    app_dir("XDG_DATA_HOME", &[".local", "share"])
        .map_or_else(
            || PathBuf::from(HISTORY_FILE_NAME),
            |dir| dir.join(HISTORY_FILE_NAME),
        )
}

fn app_dir(xdg_var: &str, home_relative: &[&str]) -> Option<PathBuf> {
    if let Some(base) = non_empty_env(xdg_var) {
        return Some(PathBuf::from(base).join(APP_DIR_NAME));
    }
    let mut dir = PathBuf::from(non_empty_env("HOME")?);
    dir.extend(home_relative);
    Some(dir.join(APP_DIR_NAME))
}

fn non_empty_env(name: &str) -> Option<std::ffi::OsString> {
    env::var_os(name).filter(|value| !value.is_empty())
}

/// Loads the default config file when it exists.
///
/// # Errors
///
/// Fails when the file exists but cannot be read, parsed or validated.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(file) if file.is_file() => Some(load_file_config(file)?),
        _ => None,
    };
    Ok(LoadedConfig {
        loaded_from_file: config.is_some(),
        path,
        config,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// One `key = value` line.
struct Entry<'a> {
    line_no: usize,
    key: &'a str,
    value: &'a str,
}

impl Entry<'_> {
    fn context(&self) -> String {
        format!("Invalid `{}` value on line {}", self.key, self.line_no)
    }

    fn parse<T>(&self) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.value.parse::<T>().with_context(|| self.context())
    }

    fn string(&self) -> Result<&str> {
        self.value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .with_context(|| format!("{}: expected double-quoted string", self.context()))
    }
}

fn entries(raw: &str) -> impl Iterator<Item = Result<Entry<'_>>> {
    raw.lines().enumerate().filter_map(|(index, line)| {
        let line = strip_inline_comment(line).trim();
        if line.is_empty() {
            return None;
        }
        let line_no = index + 1;
        Some(match line.split_once('=') {
            Some((key, value)) => Ok(Entry {
                line_no,
                key: key.trim(),
                value: value.trim(),
            }),
            None => Err(anyhow::anyhow!(
                "Invalid config syntax on line {line_no}: expected key = value"
            )),
        })
    })
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for entry in entries(raw) {
        let entry = entry?;
        match entry.key {
            "output_dir" => cfg.output_dir = Some(PathBuf::from(entry.string()?)),
            "database" => cfg.database = Some(PathBuf::from(entry.string()?)),
            "concurrency" => cfg.concurrency = Some(entry.parse()?),
            "max_retries" => cfg.max_retries = Some(entry.parse()?),
            "request_delay" => cfg.request_delay = Some(entry.parse()?),
            "dynamic_concurrency" => cfg.dynamic_concurrency = Some(entry.parse()?),
            "min_concurrency" => cfg.min_concurrency = Some(entry.parse()?),
            "page_concurrency" => cfg.page_concurrency = Some(entry.parse()?),
            "verbosity" => {
                let label = entry.string()?;
                cfg.verbosity = Some(label.parse().with_context(|| entry.context())?);
            }
            unknown => bail!(
                "Unknown configuration key: '{unknown}' on line {}",
                entry.line_no
            ),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Drops a trailing `#` comment, ignoring `#` inside quotes.
fn strip_inline_comment(line: &str) -> &str {
    let mut quoted = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..index],
            _ => {}
        }
    }
    line
}

use crate::core::db::DatabaseConfig;
use crate::core::{Result, ShellError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default number of history entries kept on disk.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Upper bound for each `rows` layout parameter.
pub const MAX_LAYOUT_WIDTH: usize = 256;

/// Column layout parameters for the `rows` output format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowsLayout {
    pub min_width: usize,
    pub tab_width: usize,
    pub padding: usize,
}

impl Default for RowsLayout {
    fn default() -> Self {
        RowsLayout {
            min_width: 4,
            tab_width: 8,
            padding: 1,
        }
    }
}

/// How query results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    /// One `key: value` line per column
    #[default]
    Pairs,
    /// One JSON object per line
    Json,
    /// Aligned table with a single header row
    Rows(RowsLayout),
}

impl OutputFormat {
    /// Parses `pairs`, `json`, or `rows[:minwidth:tabwidth:padding]`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split(':');
        match parts.next()?.to_lowercase().as_str() {
            "pairs" => Some(OutputFormat::Pairs),
            "json" => Some(OutputFormat::Json),
            "rows" => {
                let numbers: Vec<&str> = parts.collect();
                if numbers.is_empty() {
                    return Some(OutputFormat::Rows(RowsLayout::default()));
                }
                if numbers.len() != 3 {
                    return None;
                }
                Some(OutputFormat::Rows(RowsLayout {
                    min_width: layout_value(numbers[0])?,
                    tab_width: layout_value(numbers[1])?,
                    padding: layout_value(numbers[2])?,
                }))
            }
            _ => None,
        }
    }
}

fn layout_value(value: &str) -> Option<usize> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n <= MAX_LAYOUT_WIDTH)
}

/// What `apply_setting` did with a `set key=value` request.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingOutcome {
    /// The setting changed
    Updated,
    /// Unknown key or unparseable value; the previous value stays in effect
    Ignored,
    /// The caller must open a connection to this URI
    Connect(String),
}

/// Session settings read by the dispatcher and the output formatter.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub format: OutputFormat,
    /// Zero-based index of the first rendered row
    pub start_index: usize,
    /// Inclusive index of the last rendered row; `<= 0` renders everything
    pub limit: i64,
    pub color: bool,
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            format: OutputFormat::default(),
            start_index: 0,
            limit: 0,
            color: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Single mutation entry point for session settings.
    ///
    /// `value` is `None` for bare settings such as `set color`.
    pub fn apply_setting(&mut self, key: &str, value: Option<&str>) -> SettingOutcome {
        let value = value.map(str::trim);
        let updated = match (key.trim().to_lowercase().as_str(), value) {
            ("format", Some(v)) => OutputFormat::parse(v).map(|f| self.format = f),
            ("connect", Some(v)) if !v.is_empty() => {
                return SettingOutcome::Connect(v.to_string());
            }
            ("history", Some(v)) => v.parse::<usize>().ok().map(|n| self.history_limit = n),
            ("index", Some(v)) => v.parse::<usize>().ok().map(|n| self.start_index = n),
            ("limit", Some(v)) => v.parse::<i64>().ok().map(|n| self.limit = n),
            ("pager", Some(v)) => self.apply_pager(v),
            ("color", None) => {
                self.color = !self.color;
                Some(())
            }
            ("color", Some(v)) => parse_switch(v).map(|on| self.color = on),
            _ => None,
        };

        match updated {
            Some(()) => {
                debug!("Setting {} applied", key);
                SettingOutcome::Updated
            }
            None => SettingOutcome::Ignored,
        }
    }

    /// `pager=<index>[:<limit>]`; both parts must parse before either changes.
    fn apply_pager(&mut self, value: &str) -> Option<()> {
        let (index, limit) = match value.split_once(':') {
            Some((index, limit)) => (
                index.parse::<usize>().ok()?,
                Some(limit.parse::<i64>().ok()?),
            ),
            None => (value.parse::<usize>().ok()?, None),
        };
        self.start_index = index;
        if let Some(limit) = limit {
            self.limit = limit;
        }
        Some(())
    }

    /// Whether the row at zero-based `index` falls inside the window.
    pub fn in_window(&self, index: usize) -> bool {
        index >= self.start_index && (self.limit <= 0 || (index as i64) <= self.limit)
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub database: Option<DatabaseConfig>,
    pub shell: Option<ShellConfig>,
}

/// Initial session settings.
#[derive(Debug, Default, Deserialize)]
pub struct ShellConfig {
    pub format: Option<String>,
    pub history_limit: Option<usize>,
    pub index: Option<usize>,
    pub limit: Option<i64>,
    pub color: Option<bool>,
    pub history_file: Option<PathBuf>,
}

impl Config {
    /// Builds the initial session settings. An unparseable format falls back
    /// to the default, like an ignored `set format=...`.
    pub fn session(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(shell) = &self.shell {
            if let Some(format) = shell.format.as_deref().and_then(OutputFormat::parse) {
                session.format = format;
            }
            if let Some(limit) = shell.history_limit {
                session.history_limit = limit;
            }
            if let Some(index) = shell.index {
                session.start_index = index;
            }
            if let Some(limit) = shell.limit {
                session.limit = limit;
            }
            if let Some(color) = shell.color {
                session.color = color;
            }
        }
        session
    }

    pub fn history_file(&self) -> Option<&Path> {
        self.shell.as_ref()?.history_file.as_deref()
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlshell::config::load_config("sqlshell.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| ShellError::Config(e.to_string()))
}

//! Command history: a bounded, ordered list of submitted lines with a recall
//! cursor, loaded from and persisted to a line store.
use crate::core::{Result, ShellError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const HISTORY_FILE_NAME: &str = ".sqlshell_history";

/// Backing storage for history lines.
pub trait LineStore: Send {
    /// Reads every stored line, oldest first. A missing store reads as empty.
    fn read_all(&self) -> Result<Vec<String>>;

    /// Replaces the stored lines with `lines`.
    fn write_all(&mut self, lines: &[String]) -> Result<()>;
}

/// Plain-text history file, one command per line, most recent last.
#[derive(Debug, Clone)]
pub struct FileLineStore {
    path: PathBuf,
}

impl FileLineStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileLineStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `~/.sqlshell_history`
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(HISTORY_FILE_NAME))
            .ok_or_else(|| ShellError::Storage("unable to resolve home directory".to_string()))
    }
}

impl LineStore for FileLineStore {
    fn read_all(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ShellError::Storage(format!(
                "unable to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_all(&mut self, lines: &[String]) -> Result<()> {
        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        fs::write(&self.path, content).map_err(|e| {
            ShellError::Storage(format!("unable to write {}: {}", self.path.display(), e))
        })
    }
}

/// In-memory store; clones share the same lines.
#[derive(Debug, Clone, Default)]
pub struct MemoryLineStore {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLineStore {
    pub fn new(lines: Vec<String>) -> Self {
        MemoryLineStore {
            lines: Arc::new(Mutex::new(lines)),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LineStore for MemoryLineStore {
    fn read_all(&self) -> Result<Vec<String>> {
        self.lines
            .lock()
            .map(|l| l.clone())
            .map_err(|_| ShellError::Storage("history store lock poisoned".to_string()))
    }

    fn write_all(&mut self, lines: &[String]) -> Result<()> {
        let mut guard = self
            .lines
            .lock()
            .map_err(|_| ShellError::Storage("history store lock poisoned".to_string()))?;
        *guard = lines.to_vec();
        Ok(())
    }
}

/// Submitted commands plus the recall cursor used while browsing.
///
/// The cursor (`position`) is in `0..=len`; `len` means "not browsing".
pub struct HistoryStore {
    entries: Vec<String>,
    position: usize,
    limit: usize,
    store: Box<dyn LineStore>,
}

impl HistoryStore {
    pub fn new(store: Box<dyn LineStore>, limit: usize) -> Self {
        HistoryStore {
            entries: Vec::new(),
            position: 0,
            limit,
            store,
        }
    }

    /// Loads stored entries, keeping only the most recent `limit`.
    pub fn load(&mut self) -> Result<&[String]> {
        self.entries = self.store.read_all()?;
        self.truncate_to_limit();
        self.reset_cursor();
        debug!("Loaded {} history entries", self.entries.len());
        Ok(&self.entries)
    }

    pub fn append(&mut self, entry: String) {
        self.entries.push(entry);
    }

    /// Drops the oldest entries beyond the configured limit.
    pub fn truncate_to_limit(&mut self) {
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.position = self.position.min(self.entries.len());
    }

    /// Overwrites the backing store with the most recent non-blank entries.
    pub fn persist(&mut self) -> Result<()> {
        self.truncate_to_limit();
        let lines: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .cloned()
            .collect();
        self.store.write_all(&lines)?;
        info!("Persisted {} history entries", lines.len());
        Ok(())
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by zero-based index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_browsing(&self) -> bool {
        self.position < self.entries.len()
    }

    /// Stops browsing: the cursor goes back to `len`.
    pub fn reset_cursor(&mut self) {
        self.position = self.entries.len();
    }

    /// Moves the cursor one entry back. `None` when already at the oldest entry.
    pub fn recall_previous(&mut self) -> Option<&str> {
        if self.position == 0 {
            return None;
        }
        self.position -= 1;
        self.get(self.position)
    }

    /// Moves the cursor one entry forward. Returns the entry now under the
    /// cursor, or `None` when the cursor reaches (or already was at) the end.
    pub fn recall_next(&mut self) -> Option<&str> {
        if self.position >= self.entries.len() {
            return None;
        }
        self.position += 1;
        self.get(self.position)
    }
}

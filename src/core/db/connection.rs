/// Connection Management Module
///
/// Opens the SQLite handle the shell executes against, from either a
/// connection URI or the `[database]` table of a config file, and defines
/// the transaction state reported by the execution engine.

use crate::core::{Result, ShellError};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info};

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TransactionState {
    /// No explicit transaction; statements run in one-shot read transactions
    #[default]
    Idle,
    /// A `begin` has been issued and not yet committed or rolled back
    InTransaction,
}

/// The `[database]` table of the startup config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Database type, e.g. "sqlite"
    #[serde(rename = "type")]
    pub db_type: String,
    /// Database file path for file-backed databases
    pub file: Option<String>,
}

impl DatabaseConfig {
    /// Builds the connection URI described by this config.
    ///
    /// Only SQLite is available through the bundled driver; any other type is
    /// reported as a configuration error.
    pub fn uri(&self) -> Result<String> {
        match self.db_type.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => {
                let file = self.file.as_deref().ok_or_else(|| {
                    ShellError::Config("sqlite configuration requires a `file` entry".to_string())
                })?;
                Ok(format!("sqlite://{}", file))
            }
            other => Err(ShellError::Config(format!("unsupported database type {}", other))),
        }
    }
}

/// Strips the scheme from a connection URI and returns the SQLite path.
///
/// Accepts `sqlite://<path>`, `sqlite3://<path>`, `:memory:` and bare paths.
pub fn parse_uri(uri: &str) -> Result<String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(ShellError::Config("empty database uri".to_string()));
    }
    for scheme in ["sqlite://", "sqlite3://"] {
        if let Some(path) = uri.strip_prefix(scheme) {
            if path.is_empty() {
                return Err(ShellError::Config(format!("missing database path in {}", uri)));
            }
            return Ok(path.to_string());
        }
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(ShellError::Config(format!("unsupported database type {}", scheme)));
    }
    Ok(uri.to_string())
}

/// Opens and pings a SQLite database.
///
/// # Errors
///
/// Returns `ShellError::Config` for malformed or unsupported URIs and
/// `ShellError::Database` when the database cannot be opened or queried.
pub fn connect(uri: &str) -> Result<Connection> {
    let path = parse_uri(uri)?;
    debug!("Opening database at {}", path);
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(&path)?
    };
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    info!("Connected to {}", path);
    Ok(conn)
}

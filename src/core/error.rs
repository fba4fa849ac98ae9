/// Shell Error Module
///
/// This module defines the error type shared by every component of the shell.
/// Handlers report these errors to the user and keep the session alive; only
/// storage failures and input-decode failures end a session.
use thiserror::Error;

/// Error type for the shell.
///
/// The variants follow the error taxonomy of the shell:
/// - Input decoding (fatal to the session)
/// - Dispatch failures (SQL, builtins, host processes)
/// - Transaction state misuse
/// - Configuration and history storage problems
#[derive(Error, Debug)]
pub enum ShellError {
    /// Errors raised by the SQLite driver
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// SQL statement errors (preparation, execution, row decoding)
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration loading and connection string errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and terminal I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Builtin and host command errors
    #[error("Command error: {0}")]
    Command(String),

    /// Transaction-related errors
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Keystroke decoding errors
    #[error("Input error: {0}")]
    Input(String),

    /// History storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The session was ended by a termination signal
    #[error("Interrupted")]
    Interrupted,

    /// Generic application errors for unexpected conditions
    #[error("Application error: {0}")]
    App(String),
}

/// Type alias for Result to use ShellError as the error type.
pub type Result<T> = std::result::Result<T, ShellError>;

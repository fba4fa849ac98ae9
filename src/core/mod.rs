/// Core Module for sqlshell
///
/// Shared infrastructure used by every shell component: the error type, the
/// interrupt flag and the database layer (connections, statement execution,
/// decoded values).

pub mod db;
pub mod error;
pub mod interrupt;

// Re-export commonly used types for convenience
pub use error::{Result, ShellError};
pub use interrupt::Interrupt;

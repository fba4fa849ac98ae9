/// Database Module
///
/// The database layer is split into three concerns:
/// - **Connection Management** (`connection.rs`): opening a SQLite handle from a URI
///   or a config file, and the transaction state enum
/// - **Statement Execution** (`query.rs`): statement classification, the transaction
///   state machine and row materialization
/// - **Values** (`value.rs`): the closed value variant and the per-row record
///
/// All database operations use the standardized `ShellError` type.
pub mod connection;
pub mod query;
pub mod value;

pub use connection::*;
pub use query::*;
pub use value::*;

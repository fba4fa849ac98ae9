/// Statement Execution Module
///
/// Executes SQL typed at the prompt against the open connection. It owns the
/// explicit transaction state machine (`begin` / `commit` / `rollback`),
/// applies `insert` / `delete` only inside an open transaction, and streams
/// every other statement's rows as decoded `Record`s through a `RecordSink`.

use super::connection::TransactionState;
use super::value::{Record, Value};
use crate::core::{Interrupt, Result, ShellError};
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Savepoint wrapping the read path; rolled back after every query.
const READ_SAVEPOINT: &str = "sqlshell_read";

/// Virtual machine steps between interrupt checks.
const INTERRUPT_CHECK_OPS: i32 = 1000;

/// Receives the output of a query, one record at a time.
pub trait RecordSink {
    /// Called once per query, before any record, with the lower-cased column names.
    fn columns(&mut self, columns: &[String]) -> Result<()>;

    /// Called for every row in data source order; `index` is the zero-based row counter.
    fn record(&mut self, index: usize, record: &Record) -> Result<()>;
}

impl RecordSink for Vec<Record> {
    fn columns(&mut self, _columns: &[String]) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, _index: usize, record: &Record) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// How the engine treats a statement, decided by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Insert,
    Delete,
    /// Everything else, run through the read-only one-shot path
    Query,
}

impl StatementKind {
    /// Determines the statement kind from a SQL string (case-insensitive).
    pub fn from_sql(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        match keyword.as_str() {
            "begin" => StatementKind::Begin,
            "commit" => StatementKind::Commit,
            "rollback" => StatementKind::Rollback,
            "insert" => StatementKind::Insert,
            "delete" => StatementKind::Delete,
            _ => StatementKind::Query,
        }
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Begun,
    Committed,
    RolledBack,
    /// `rollback` with no open transaction
    NothingToRollback,
    /// DML applied inside the open transaction, with the affected row count
    Applied(usize),
    /// DML issued outside a transaction; not executed
    Dropped,
    /// Query streamed this many rows
    Rows(usize),
}

/// Book-keeping for the single open transaction.
#[derive(Debug, Default)]
struct OpenTransaction {
    statements: usize,
}

/// Removes blank lines and surrounding whitespace from a statement.
pub fn clean_statement(sql: &str) -> String {
    sql.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Executes statements against one connection.
pub struct SqlEngine {
    conn: Connection,
    tx: Option<OpenTransaction>,
    interrupt: Interrupt,
}

impl SqlEngine {
    /// Creates an engine over an already opened connection.
    pub fn new(conn: Connection) -> Self {
        let engine = SqlEngine {
            conn,
            tx: None,
            interrupt: Interrupt::new(),
        };
        engine.watch_interrupt();
        engine
    }

    /// Aborts running statements once `interrupt` is raised.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
        self.watch_interrupt();
    }

    fn watch_interrupt(&self) {
        let interrupt = self.interrupt.clone();
        self.conn
            .progress_handler(INTERRUPT_CHECK_OPS, Some(move || interrupt.is_raised()));
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn state(&self) -> TransactionState {
        if self.tx.is_some() {
            TransactionState::InTransaction
        } else {
            TransactionState::Idle
        }
    }

    /// Swaps in a new connection. An open transaction on the old connection is
    /// rolled back first.
    pub fn replace_connection(&mut self, conn: Connection) {
        if self.tx.take().is_some() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back open transaction before reconnect: {}", e);
            }
        }
        self.conn = conn;
        self.watch_interrupt();
    }

    /// Executes a statement, dispatching on its leading keyword.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::Transaction` for `begin` while a transaction is open
    /// and for `commit` without one; `ShellError::Query` or
    /// `ShellError::Database` when SQLite rejects the statement.
    pub fn execute(&mut self, sql: &str, sink: &mut dyn RecordSink) -> Result<ExecOutcome> {
        let sql = clean_statement(sql);
        if sql.is_empty() {
            return Err(ShellError::Query("empty statement".to_string()));
        }

        match StatementKind::from_sql(&sql) {
            StatementKind::Begin => self.begin(),
            StatementKind::Commit => self.commit(),
            StatementKind::Rollback => self.rollback(),
            StatementKind::Insert | StatementKind::Delete => self.apply(&sql),
            StatementKind::Query => self.query(&sql, sink),
        }
    }

    fn begin(&mut self) -> Result<ExecOutcome> {
        if self.tx.is_some() {
            return Err(ShellError::Transaction(
                "transaction already in progress".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN")?;
        self.tx = Some(OpenTransaction::default());
        info!("Transaction started");
        Ok(ExecOutcome::Begun)
    }

    fn commit(&mut self) -> Result<ExecOutcome> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(ShellError::Transaction("transaction not started".to_string()));
        };
        let statements = tx.statements;
        self.conn.execute_batch("COMMIT")?;
        self.tx = None;
        info!("Transaction committed after {} statement(s)", statements);
        Ok(ExecOutcome::Committed)
    }

    fn rollback(&mut self) -> Result<ExecOutcome> {
        if self.tx.is_none() {
            debug!("Rollback requested with no open transaction");
            return Ok(ExecOutcome::NothingToRollback);
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.tx = None;
        info!("Transaction rolled back");
        Ok(ExecOutcome::RolledBack)
    }

    fn apply(&mut self, sql: &str) -> Result<ExecOutcome> {
        let Some(tx) = self.tx.as_mut() else {
            warn!("Dropping statement issued outside a transaction: {}", sql);
            return Ok(ExecOutcome::Dropped);
        };
        let affected = self
            .conn
            .execute(sql, [])
            .map_err(|e| ShellError::Query(format!("unable to execute statement: {}", e)))?;
        tx.statements += 1;
        debug!("Statement affected {} row(s)", affected);
        Ok(ExecOutcome::Applied(affected))
    }

    fn query(&mut self, sql: &str, sink: &mut dyn RecordSink) -> Result<ExecOutcome> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", READ_SAVEPOINT))?;
        let streamed = stream_rows(&self.conn, sql, sink);
        let reset = self
            .conn
            .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", READ_SAVEPOINT));
        let count = streamed?;
        reset?;
        Ok(ExecOutcome::Rows(count))
    }
}

fn stream_rows(conn: &Connection, sql: &str, sink: &mut dyn RecordSink) -> Result<usize> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ShellError::Query(format!("unable to query statement: {}", e)))?;

    let columns: Vec<(String, Option<String>)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_lowercase(), c.decl_type().map(str::to_string)))
        .collect();
    // A repeated name is one record key, so it is one column for the sink too
    let mut names: Vec<String> = Vec::with_capacity(columns.len());
    for (name, _) in &columns {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    sink.columns(&names)?;

    let mut rows = stmt
        .query([])
        .map_err(|e| ShellError::Query(format!("unable to query statement: {}", e)))?;
    let mut index = 0;
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, (name, decl_type)) in columns.iter().enumerate() {
            record.insert(name, Value::from_sqlite(row.get_ref(i)?, decl_type.as_deref()));
        }
        sink.record(index, &record)?;
        index += 1;
    }
    Ok(index)
}

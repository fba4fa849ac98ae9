use sqlshell::config::{self, Config};
use sqlshell::core::db::{self, SqlEngine};
use sqlshell::core::{Interrupt, Result, ShellError};
use sqlshell::dispatcher::CommandDispatcher;
use sqlshell::history::{FileLineStore, HistoryStore};
use sqlshell::input::KeyInputEngine;
use sqlshell::shell;
use sqlshell::terminal::CrosstermKeys;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: sqlshell <dburi | config.toml>

  dburi        sqlite://<path>, sqlite3://<path>, :memory: or a database file
  config.toml  TOML file with [database] and [shell] tables

Set SQLSHELL_LOG (e.g. SQLSHELL_LOG=debug) to see diagnostics on stderr.
";

/// Exit status after SIGINT/SIGTERM, as shells report 128 + SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries query results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("SQLSHELL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let target = match args.as_slice() {
        [] => {
            eprint!("{}", USAGE);
            return ExitCode::from(2);
        }
        [flag] if flag == "-h" || flag == "--help" => {
            print!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        parts => parts.join(""),
    };

    let interrupt = Interrupt::new();
    match run(&target, &interrupt) {
        Ok(()) if interrupt.is_raised() => ExitCode::from(INTERRUPTED_EXIT),
        Ok(()) => ExitCode::SUCCESS,
        Err(ShellError::Interrupted) => ExitCode::from(INTERRUPTED_EXIT),
        Err(e) => {
            error!("sqlshell terminated: {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(target: &str, interrupt: &Interrupt) -> Result<()> {
    info!("Starting sqlshell...");
    interrupt.install()?;

    let config = if target.ends_with(".toml") {
        config::load_config(target)?
    } else {
        Config::default()
    };
    let uri = match &config.database {
        Some(database) => database.uri()?,
        None if target.ends_with(".toml") => {
            return Err(ShellError::Config(format!("{} has no [database] table", target)));
        }
        None => target.to_string(),
    };
    let conn = db::connect(&uri)?;
    let session = config.session();

    let history_path = match config.history_file() {
        Some(path) => path.to_path_buf(),
        None => FileLineStore::default_path()?,
    };
    let mut history = HistoryStore::new(
        Box::new(FileLineStore::new(&history_path)),
        session.history_limit,
    );
    history.load()?;

    let mut editor = KeyInputEngine::new(history);
    let dispatcher = CommandDispatcher::new(SqlEngine::new(conn), session);

    println!("Connected to {}. Type 'help' for commands.", uri);
    let mut keys = CrosstermKeys::new(interrupt.clone())?;
    let mut stdout = std::io::stdout();
    shell::run_session(&mut editor, &mut keys, &mut stdout, dispatcher, interrupt)?;

    info!("Session finished");
    Ok(())
}

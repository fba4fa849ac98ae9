use crate::config::{SessionConfig, SettingOutcome};
use crate::core::db::{connect, SqlEngine};
use crate::core::{Interrupt, Result, ShellError};
use crate::output::OutputFormatter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use tracing::{debug, error, info};

static SQL_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(select|insert|update|delete|begin|commit|rollback|alter|create)\b")
        .expect("valid regex")
});

static SET_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^set(\s+(?P<key>[^=\s]+)\s*(=\s*(?P<value>.*))?)?\s*$").expect("valid regex"));

const HELP: &str = "\
Available commands:
  help                      - show this message
  history                   - list previous commands
  !<N>                      - run history entry N again
  set format=<pairs|json|rows[:minwidth:tabwidth:padding]>
  set connect=<uri>         - open another database
  set history=<N>           - keep at most N history entries
  set index=<N>             - first row to display
  set limit=<N>             - last row to display (0 for all)
  set pager=<index>[:<limit>]
  set color                 - toggle colored output
  cd <path>                 - change working directory
  exit | quit               - leave the shell

SQL statements (select, insert, update, delete, begin, commit, rollback,
alter, create) run against the database; insert and delete only apply
inside begin ... commit. Anything else runs as a host command.
";

/// Commands interpreted by the dispatcher itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    History,
    /// `!<N>`; resolved by the line editor before dispatch
    Recall,
    Help,
    Set { key: String, value: Option<String> },
    /// A `set` line that is not `set <key>[=<value>]`
    MalformedSet(String),
    Exit,
    Cd(Option<String>),
}

/// A classified command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Builtin(Builtin),
    Sql(String),
    /// Program and arguments for a host process
    Shell(Vec<String>),
}

/// Classifies a command line; the first matching rule wins.
pub fn classify(line: &str) -> Command {
    let line = line.trim();
    if line == "history" {
        return Command::Builtin(Builtin::History);
    }
    if line.starts_with('!') {
        return Command::Builtin(Builtin::Recall);
    }
    if SQL_STATEMENT.is_match(line) {
        return Command::Sql(line.to_string());
    }
    if line == "help" || line.starts_with("help ") {
        return Command::Builtin(Builtin::Help);
    }
    if is_set_command(line) {
        return Command::Builtin(match SET_COMMAND.captures(line) {
            Some(caps) => Builtin::Set {
                key: caps.name("key").map(|m| m.as_str().to_string()).unwrap_or_default(),
                value: caps.name("value").map(|m| m.as_str().trim().to_string()),
            },
            None => Builtin::MalformedSet(line.to_string()),
        });
    }
    if line == "exit" || line == "quit" {
        return Command::Builtin(Builtin::Exit);
    }

    let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if args.first().map(String::as_str) == Some("cd") {
        return Command::Builtin(Builtin::Cd(args.get(1).cloned()));
    }
    Command::Shell(args)
}

/// `set` as a whole word, with or without arguments.
fn is_set_command(line: &str) -> bool {
    line.strip_prefix("set")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// Replaces a leading `~` with the home directory.
pub fn expand_tilde(arg: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return arg.to_string();
    };
    if arg == "~" {
        return home.display().to_string();
    }
    match arg.strip_prefix("~/") {
        Some(rest) => home.join(rest).display().to_string(),
        None => arg.to_string(),
    }
}

/// Runs host programs for command lines that are neither builtins nor SQL.
pub trait ProcessRunner: Send {
    fn run(&mut self, program: &str, args: &[String]) -> Result<()>;
}

/// Spawns the program with the shell's own stdin, stdout and stderr.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<()> {
        info!("Running {} {:?}", program, args);
        let status = Process::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| ShellError::Command(format!("{}: {}", program, e)))?;
        if !status.success() {
            return Err(ShellError::Command(format!("{}: {}", program, status)));
        }
        Ok(())
    }
}

/// Whether the session keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Routes completed command lines to builtins, the SQL engine or a host
/// process. Owns the session settings and the database connection.
pub struct CommandDispatcher {
    engine: SqlEngine,
    config: SessionConfig,
    runner: Box<dyn ProcessRunner>,
    home: Option<PathBuf>,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

impl CommandDispatcher {
    pub fn new(engine: SqlEngine, config: SessionConfig) -> Self {
        CommandDispatcher {
            engine,
            config,
            runner: Box::new(SystemRunner),
            home: dirs::home_dir(),
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
        }
    }

    pub fn with_runner(mut self, runner: Box<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_output(mut self, out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self.err = err;
        self
    }

    /// Running statements are aborted once `interrupt` is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.engine.set_interrupt(interrupt);
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &SqlEngine {
        &self.engine
    }

    /// Dispatches a line and reports any error on the error stream. Errors
    /// never end the session.
    pub fn handle(&mut self, line: &str) -> Flow {
        match self.dispatch(line) {
            Ok(flow) => flow,
            Err(e) => {
                error!("Command failed: {}", e);
                let _ = writeln!(self.err, "{}", e);
                let _ = self.err.flush();
                Flow::Continue
            }
        }
    }

    pub fn dispatch(&mut self, line: &str) -> Result<Flow> {
        match classify(line) {
            Command::Builtin(Builtin::History) | Command::Builtin(Builtin::Recall) => {
                debug!("History builtin reached the dispatcher: {}", line);
            }
            Command::Builtin(Builtin::Help) => {
                self.out.write_all(HELP.as_bytes())?;
            }
            Command::Builtin(Builtin::Set { key, value }) => self.apply_setting(&key, value.as_deref())?,
            Command::Builtin(Builtin::MalformedSet(line)) => {
                writeln!(self.err, "set: cannot parse '{}', see 'help' for usage", line)?;
            }
            Command::Builtin(Builtin::Exit) => return Ok(Flow::Exit),
            Command::Builtin(Builtin::Cd(path)) => self.change_directory(path.as_deref())?,
            Command::Sql(sql) => self.run_sql(&sql)?,
            Command::Shell(args) => self.run_process(&args)?,
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn apply_setting(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        match self.config.apply_setting(key, value) {
            SettingOutcome::Updated => {}
            SettingOutcome::Ignored => {
                writeln!(self.err, "set: ignoring '{}', see 'help' for usage", key)?;
            }
            SettingOutcome::Connect(uri) => {
                let conn = connect(&uri)?;
                self.engine.replace_connection(conn);
                writeln!(self.out, "connected to {}", uri)?;
            }
        }
        Ok(())
    }

    fn change_directory(&mut self, path: Option<&str>) -> Result<()> {
        let path = path.ok_or_else(|| ShellError::Command("path required".to_string()))?;
        let target = expand_tilde(path, self.home.as_deref());
        std::env::set_current_dir(&target)
            .map_err(|e| ShellError::Command(format!("cd: {}: {}", target, e)))
    }

    fn run_sql(&mut self, sql: &str) -> Result<()> {
        let mut formatter = OutputFormatter::new(&mut *self.out, &self.config);
        let outcome = self.engine.execute(sql, &mut formatter)?;
        debug!("Statement finished: {:?}", outcome);
        Ok(())
    }

    fn run_process(&mut self, args: &[String]) -> Result<()> {
        let Some((program, rest)) = args.split_first() else {
            return Ok(());
        };
        let rest: Vec<String> = rest
            .iter()
            .map(|arg| expand_tilde(arg, self.home.as_deref()))
            .collect();
        self.out.flush()?;
        self.runner.run(program, &rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::test_utils::{RecordingRunner, SharedBuffer};
    use rusqlite::Connection;

    fn dispatcher() -> (CommandDispatcher, SharedBuffer, SharedBuffer, RecordingRunner) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER, name TEXT);
             INSERT INTO t VALUES (1, 'a');
             INSERT INTO t VALUES (2, 'b');",
        )
        .unwrap();
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let runner = RecordingRunner::default();
        let dispatcher = CommandDispatcher::new(SqlEngine::new(conn), SessionConfig::default())
            .with_output(Box::new(out.clone()), Box::new(err.clone()))
            .with_runner(Box::new(runner.clone()))
            .with_home(Some(PathBuf::from("/home/tester")));
        (dispatcher, out, err, runner)
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(classify("history"), Command::Builtin(Builtin::History));
        assert_eq!(classify("!3"), Command::Builtin(Builtin::Recall));
        assert_eq!(classify("SELECT * FROM t"), Command::Sql("SELECT * FROM t".to_string()));
        assert_eq!(classify("select*from t"), Command::Sql("select*from t".to_string()));
        assert_eq!(classify("Create table x (a)"), Command::Sql("Create table x (a)".to_string()));
        assert_eq!(classify("help"), Command::Builtin(Builtin::Help));
        assert_eq!(classify("exit"), Command::Builtin(Builtin::Exit));
        assert_eq!(classify("quit"), Command::Builtin(Builtin::Exit));
        assert_eq!(classify("cd"), Command::Builtin(Builtin::Cd(None)));
        assert_eq!(
            classify("cd /tmp"),
            Command::Builtin(Builtin::Cd(Some("/tmp".to_string())))
        );
        assert_eq!(
            classify("ls -l  ~"),
            Command::Shell(vec!["ls".to_string(), "-l".to_string(), "~".to_string()])
        );
        // Keyword prefixes must be whole words
        assert_eq!(classify("selector"), Command::Shell(vec!["selector".to_string()]));
    }

    #[test]
    fn test_classify_set() {
        assert_eq!(
            classify("set format=rows:4:8:1"),
            Command::Builtin(Builtin::Set {
                key: "format".to_string(),
                value: Some("rows:4:8:1".to_string())
            })
        );
        assert_eq!(
            classify("set limit = 10"),
            Command::Builtin(Builtin::Set {
                key: "limit".to_string(),
                value: Some("10".to_string())
            })
        );
        assert_eq!(
            classify("set color"),
            Command::Builtin(Builtin::Set {
                key: "color".to_string(),
                value: None
            })
        );
        assert_eq!(classify("setup.sh"), Command::Shell(vec!["setup.sh".to_string()]));
        assert_eq!(
            classify("set format json"),
            Command::Builtin(Builtin::MalformedSet("set format json".to_string()))
        );
    }

    #[test]
    fn test_malformed_set_is_hinted_not_run() {
        let (mut dispatcher, _, err, runner) = dispatcher();
        assert_eq!(dispatcher.handle("set format json"), Flow::Continue);
        assert!(err.contents().contains("set: cannot parse 'set format json'"));
        assert!(runner.calls().is_empty());
        assert_eq!(dispatcher.config().format, OutputFormat::Pairs);
    }

    #[test]
    fn test_oversized_rows_layout_is_rejected() {
        let (mut dispatcher, out, err, _) = dispatcher();
        dispatcher.handle("set format=rows:0:0:18446744073709551615");
        assert!(err.contents().contains("ignoring 'format'"));
        assert_eq!(dispatcher.handle("select id from t where id = 1"), Flow::Continue);
        assert_eq!(out.contents(), "\nid: 1\n");
    }

    #[test]
    fn test_expand_tilde() {
        let home = Path::new("/home/tester");
        assert_eq!(expand_tilde("~", Some(home)), "/home/tester");
        assert_eq!(expand_tilde("~/src", Some(home)), "/home/tester/src");
        assert_eq!(expand_tilde("a~b", Some(home)), "a~b");
        assert_eq!(expand_tilde("~", None), "~");
    }

    #[test]
    fn test_sql_goes_through_formatter() {
        let (mut dispatcher, out, _, _) = dispatcher();
        dispatcher.handle("set format=json");
        assert_eq!(dispatcher.config().format, OutputFormat::Json);
        assert_eq!(dispatcher.handle("select id, name from t order by id"), Flow::Continue);
        assert_eq!(out.contents(), "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n");
    }

    #[test]
    fn test_errors_are_reported_and_session_continues() {
        let (mut dispatcher, _, err, _) = dispatcher();
        assert_eq!(dispatcher.handle("select * from missing"), Flow::Continue);
        assert_eq!(dispatcher.handle("commit"), Flow::Continue);
        assert_eq!(dispatcher.handle("cd"), Flow::Continue);
        let errors = err.contents();
        assert!(errors.contains("no such table"));
        assert!(errors.contains("transaction not started"));
        assert!(errors.contains("path required"));
    }

    #[test]
    fn test_cd_to_missing_directory() {
        let (mut dispatcher, _, _, _) = dispatcher();
        assert!(matches!(
            dispatcher.dispatch("cd /definitely/not/here"),
            Err(ShellError::Command(_))
        ));
    }

    #[test]
    fn test_exit_and_quit() {
        let (mut dispatcher, _, _, _) = dispatcher();
        assert_eq!(dispatcher.handle("exit"), Flow::Exit);
        assert_eq!(dispatcher.handle("quit"), Flow::Exit);
    }

    #[test]
    fn test_shell_passthrough_expands_home() {
        let (mut dispatcher, _, _, runner) = dispatcher();
        dispatcher.handle("ls -la ~/projects");
        assert_eq!(
            runner.calls(),
            vec![vec![
                "ls".to_string(),
                "-la".to_string(),
                "/home/tester/projects".to_string()
            ]]
        );
    }

    #[test]
    fn test_unknown_setting_is_hinted_not_fatal() {
        let (mut dispatcher, _, err, _) = dispatcher();
        let before = dispatcher.config().clone();
        assert_eq!(dispatcher.handle("set bogus=1"), Flow::Continue);
        assert_eq!(dispatcher.handle("set limit=abc"), Flow::Continue);
        assert_eq!(dispatcher.config(), &before);
        assert!(err.contents().contains("ignoring 'bogus'"));
    }

    #[test]
    fn test_set_connect_switches_database() {
        let (mut dispatcher, out, err, _) = dispatcher();
        dispatcher.handle("set connect=:memory:");
        assert!(out.contents().contains("connected to :memory:"));
        dispatcher.handle("select * from t");
        assert!(err.contents().contains("no such table"));

        dispatcher.handle("set connect=mysql://nowhere");
        assert!(err.contents().contains("unsupported database type mysql"));
    }

    #[test]
    fn test_help_text() {
        let (mut dispatcher, out, _, _) = dispatcher();
        dispatcher.handle("help");
        assert!(out.contents().contains("set format="));
        assert!(out.contents().contains("exit | quit"));
    }
}

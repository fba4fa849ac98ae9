//! The two flows of a session and the queues between them.
//!
//! The input loop reads keys and edits the line on the calling thread. Each
//! completed command goes onto the command queue, and the input loop then
//! waits on the reply queue until the dispatcher has finished with it, so
//! commands run strictly one at a time. The dispatcher loop runs on its own
//! thread, owns the connection and the session settings, and stops on a
//! `Shutdown` message or after an `exit` builtin.
//!
//! A raised `Interrupt` (SIGINT or SIGTERM) ends the input loop at its next
//! check, including while a command is running, and history is flushed on
//! the way out like any other exit.
use crate::core::{Interrupt, Result, ShellError};
use crate::dispatcher::{CommandDispatcher, Flow};
use crate::input::{KeyInputEngine, Line, Outcome};
use crate::terminal::{draw_line, new_line, KeySource};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the dispatcher waits on an empty queue before polling again.
pub const IDLE_POLL: Duration = Duration::from_millis(10);

/// How long an interrupted session waits for a busy dispatcher to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const QUEUE_DEPTH: usize = 16;

/// Input loop to dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Line(String),
    Shutdown,
}

/// Dispatcher to input loop, once per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Ready for the next command; carries the current history limit
    Ready { history_limit: usize },
    /// The session was ended by a builtin; the dispatcher has stopped
    Exit,
}

/// Drains the command queue until told to stop.
pub fn run_dispatch_loop(
    dispatcher: &mut CommandDispatcher,
    commands: &Receiver<Submission>,
    replies: &SyncSender<Reply>,
) {
    info!("Dispatcher loop started");
    loop {
        match commands.recv_timeout(IDLE_POLL) {
            Ok(Submission::Line(line)) => {
                debug!("Dispatching {}", line);
                let reply = match dispatcher.handle(&line) {
                    Flow::Continue => Reply::Ready {
                        history_limit: dispatcher.config().history_limit,
                    },
                    Flow::Exit => Reply::Exit,
                };
                let exiting = reply == Reply::Exit;
                if replies.send(reply).is_err() || exiting {
                    break;
                }
            }
            Ok(Submission::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
    info!("Dispatcher loop stopped");
}

/// Runs the line editor until the session ends, then stops the dispatcher
/// and persists history. Every way out goes through the history flush.
pub fn run_input_loop<S: KeySource, W: Write>(
    engine: &mut KeyInputEngine,
    keys: &mut S,
    out: &mut W,
    commands: &SyncSender<Submission>,
    replies: &Receiver<Reply>,
    interrupt: &Interrupt,
) -> Result<()> {
    let listened = listen(engine, keys, out, commands, replies, interrupt);
    if let Err(e) = &listened {
        error!("fail on keyboard listen: {}", e);
    }
    // The dispatcher is already gone after an `exit` builtin.
    let _ = commands.send(Submission::Shutdown);
    let persisted = engine.history_mut().persist();
    listened.and(persisted)
}

fn listen<S: KeySource, W: Write>(
    engine: &mut KeyInputEngine,
    keys: &mut S,
    out: &mut W,
    commands: &SyncSender<Submission>,
    replies: &Receiver<Reply>,
    interrupt: &Interrupt,
) -> Result<()> {
    draw_line(out, &engine.render())?;
    loop {
        if interrupt.is_raised() {
            info!("Session interrupted");
            new_line(out)?;
            return Ok(());
        }
        let Some(key) = keys.next_key()? else {
            debug!("Key stream ended");
            new_line(out)?;
            return Ok(());
        };
        match engine.handle_key(key) {
            Outcome::Redraw => draw_line(out, &engine.render())?,
            Outcome::Unchanged => {}
            Outcome::Quit => {
                new_line(out)?;
                return Ok(());
            }
            Outcome::Submitted(line) => {
                new_line(out)?;
                match line {
                    Line::Blank => {}
                    Line::Unresolved(index) => debug!("No history entry {}", index),
                    Line::ShowHistory => {
                        for entry in engine.history_listing() {
                            write!(out, "{}\r\n", entry)?;
                        }
                    }
                    Line::Command(command) => {
                        match execute(command, keys, commands, replies, interrupt)? {
                            Some(Reply::Ready { history_limit }) => {
                                engine.history_mut().set_limit(history_limit)
                            }
                            Some(Reply::Exit) => return Ok(()),
                            None => {
                                info!("Session interrupted while a command was running");
                                return Ok(());
                            }
                        }
                    }
                }
                draw_line(out, &engine.render())?;
            }
        }
    }
}

/// Hands one command to the dispatcher and waits until it is done.
/// `None` means the interrupt was raised first.
fn execute<S: KeySource>(
    command: String,
    keys: &mut S,
    commands: &SyncSender<Submission>,
    replies: &Receiver<Reply>,
    interrupt: &Interrupt,
) -> Result<Option<Reply>> {
    keys.suspend()?;
    commands
        .send(Submission::Line(command))
        .map_err(|_| ShellError::App("command dispatcher has stopped".to_string()))?;
    let reply = loop {
        match replies.recv_timeout(IDLE_POLL) {
            Ok(reply) => break reply,
            Err(RecvTimeoutError::Timeout) if interrupt.is_raised() => return Ok(None),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ShellError::App("command dispatcher has stopped".to_string()));
            }
        }
    };
    keys.resume()?;
    Ok(Some(reply))
}

/// Polls until the worker has finished or `grace` has passed.
fn finished_within<T>(worker: &JoinHandle<T>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(IDLE_POLL);
    }
    true
}

/// Runs a whole session: the dispatcher on a worker thread, the line editor
/// on the calling thread. Returns the dispatcher once both have stopped.
///
/// # Errors
///
/// `ShellError::Interrupted` when the interrupt was raised and the dispatcher
/// was still busy after a short grace period; it is left running detached.
pub fn run_session<S: KeySource, W: Write>(
    engine: &mut KeyInputEngine,
    keys: &mut S,
    out: &mut W,
    dispatcher: CommandDispatcher,
    interrupt: &Interrupt,
) -> Result<CommandDispatcher> {
    let mut dispatcher = dispatcher.with_interrupt(interrupt.clone());
    let (command_tx, command_rx) = mpsc::sync_channel(QUEUE_DEPTH);
    let (reply_tx, reply_rx) = mpsc::sync_channel(1);

    let worker = thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || {
            run_dispatch_loop(&mut dispatcher, &command_rx, &reply_tx);
            dispatcher
        })?;

    let listened = run_input_loop(engine, keys, out, &command_tx, &reply_rx, interrupt);
    if interrupt.is_raised() && !finished_within(&worker, SHUTDOWN_GRACE) {
        warn!("Dispatcher still busy after interrupt, not waiting for it");
        listened?;
        return Err(ShellError::Interrupted);
    }
    let dispatcher = worker
        .join()
        .map_err(|_| ShellError::App("dispatcher thread panicked".to_string()))?;
    listened.map(|_| dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::core::db::SqlEngine;
    use crate::dispatcher::ProcessRunner;
    use crate::history::{HistoryStore, MemoryLineStore};
    use crate::input::Key;
    use crate::terminal::ScriptedKeys;
    use crate::test_utils::{RecordingRunner, SharedBuffer};
    use rusqlite::Connection;

    fn editor(store: &MemoryLineStore) -> KeyInputEngine {
        let mut history = HistoryStore::new(Box::new(store.clone()), 100);
        history.load().unwrap();
        KeyInputEngine::new(history)
    }

    fn dispatcher(out: &SharedBuffer) -> CommandDispatcher {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        CommandDispatcher::new(SqlEngine::new(conn), SessionConfig::default())
            .with_output(Box::new(out.clone()), Box::new(out.clone()))
            .with_runner(Box::new(RecordingRunner::default()))
    }

    fn script(lines: &[&str]) -> ScriptedKeys {
        ScriptedKeys::new(lines.iter().flat_map(|line| ScriptedKeys::line(line)))
    }

    #[test]
    fn test_dispatch_loop_stops_on_shutdown() {
        let out = SharedBuffer::default();
        let mut dispatcher = dispatcher(&out);
        let (command_tx, command_rx) = mpsc::sync_channel(4);
        let (reply_tx, reply_rx) = mpsc::sync_channel(4);

        command_tx.send(Submission::Line("help".to_string())).unwrap();
        command_tx.send(Submission::Shutdown).unwrap();
        command_tx.send(Submission::Line("help".to_string())).unwrap();
        run_dispatch_loop(&mut dispatcher, &command_rx, &reply_tx);

        assert_eq!(reply_rx.try_recv().unwrap(), Reply::Ready { history_limit: 1000 });
        assert!(reply_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_loop_stops_after_exit() {
        let out = SharedBuffer::default();
        let mut dispatcher = dispatcher(&out);
        let (command_tx, command_rx) = mpsc::sync_channel(4);
        let (reply_tx, reply_rx) = mpsc::sync_channel(4);

        command_tx.send(Submission::Line("set history=5".to_string())).unwrap();
        command_tx.send(Submission::Line("quit".to_string())).unwrap();
        command_tx.send(Submission::Line("help".to_string())).unwrap();
        run_dispatch_loop(&mut dispatcher, &command_rx, &reply_tx);

        assert_eq!(reply_rx.try_recv().unwrap(), Reply::Ready { history_limit: 5 });
        assert_eq!(reply_rx.try_recv().unwrap(), Reply::Exit);
        assert!(!out.contents().contains("Available commands"));
    }

    #[test]
    fn test_session_runs_commands_in_order_and_persists_history() {
        let store = MemoryLineStore::default();
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let mut keys = script(&[
            "begin",
            "insert into t values (7)",
            "commit",
            "set format=json",
            "select id from t",
            "exit",
        ]);
        let mut screen = Vec::new();

        let dispatcher = run_session(&mut engine, &mut keys, &mut screen, dispatcher(&out), &Interrupt::new()).unwrap();

        assert_eq!(out.contents(), "{\"id\":7}\n");
        assert!(dispatcher.engine().connection().is_autocommit());
        assert_eq!(store.lines().len(), 6);
        assert_eq!(store.lines()[5], "exit");
    }

    #[test]
    fn test_interrupt_key_ends_session() {
        let store = MemoryLineStore::default();
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let mut keys = ScriptedKeys::new(
            ScriptedKeys::line("help")
                .into_iter()
                .chain([Key::Char('x'), Key::Interrupt, Key::Char('y')]),
        );
        let mut screen = Vec::new();

        run_session(&mut engine, &mut keys, &mut screen, dispatcher(&out), &Interrupt::new()).unwrap();

        assert!(out.contents().contains("Available commands"));
        assert_eq!(store.lines(), vec!["help".to_string()]);
        // Keys after the interrupt are never read
        assert_eq!(keys.next_key().unwrap(), Some(Key::Char('y')));
    }

    #[test]
    fn test_history_limit_follows_set_history() {
        let store = MemoryLineStore::default();
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let mut keys = script(&["help", "help", "set history=2", "help"]);
        let mut screen = Vec::new();

        run_session(&mut engine, &mut keys, &mut screen, dispatcher(&out), &Interrupt::new()).unwrap();

        assert_eq!(engine.history().limit(), 2);
        assert_eq!(store.lines(), vec!["set history=2".to_string(), "help".to_string()]);
    }

    struct FailingKeys;

    impl KeySource for FailingKeys {
        fn next_key(&mut self) -> Result<Option<Key>> {
            Err(ShellError::Input("malformed escape sequence".to_string()))
        }
    }

    #[test]
    fn test_decode_error_ends_session_and_flushes_history() {
        let store = MemoryLineStore::new(vec!["select 1".to_string()]);
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let mut screen = Vec::new();

        let result = run_session(&mut engine, &mut FailingKeys, &mut screen, dispatcher(&out), &Interrupt::new());
        assert!(matches!(result, Err(ShellError::Input(_))));
        assert_eq!(store.lines(), vec!["select 1".to_string()]);
    }

    /// Raises the interrupt from inside a host command, the way SIGINT
    /// arrives while a child process runs in cooked mode.
    struct InterruptingRunner {
        interrupt: Interrupt,
        calls: RecordingRunner,
        busy_for: Duration,
    }

    impl ProcessRunner for InterruptingRunner {
        fn run(&mut self, program: &str, args: &[String]) -> Result<()> {
            self.calls.run(program, args)?;
            self.interrupt.raise();
            thread::sleep(self.busy_for);
            Ok(())
        }
    }

    fn interrupted_session(
        busy_for: Duration,
    ) -> (Result<CommandDispatcher>, MemoryLineStore, RecordingRunner) {
        let store = MemoryLineStore::new(vec!["select 1".to_string()]);
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let interrupt = Interrupt::new();
        let calls = RecordingRunner::default();
        let runner = InterruptingRunner {
            interrupt: interrupt.clone(),
            calls: calls.clone(),
            busy_for,
        };
        let dispatcher = dispatcher(&out).with_runner(Box::new(runner));
        let mut keys = script(&["help", "sleep 5", "echo after"]);
        let mut screen = Vec::new();

        let result = run_session(&mut engine, &mut keys, &mut screen, dispatcher, &interrupt);
        (result, store, calls)
    }

    #[test]
    fn test_interrupt_during_command_flushes_history() {
        let (_, store, calls) = interrupted_session(Duration::ZERO);

        assert_eq!(
            store.lines(),
            vec!["select 1".to_string(), "help".to_string(), "sleep 5".to_string()]
        );
        assert_eq!(calls.calls(), vec![vec!["sleep".to_string(), "5".to_string()]]);
    }

    #[test]
    fn test_interrupt_does_not_wait_for_busy_dispatcher() {
        let started = Instant::now();
        let (result, store, _) = interrupted_session(Duration::from_secs(10));

        assert!(matches!(result, Err(ShellError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(store.lines().len(), 3);
    }

    #[test]
    fn test_interrupt_before_first_key_still_persists() {
        let store = MemoryLineStore::new(vec!["select 1".to_string(), "  ".to_string()]);
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let interrupt = Interrupt::new();
        interrupt.raise();
        let mut keys = script(&["help"]);
        let mut screen = Vec::new();

        run_session(&mut engine, &mut keys, &mut screen, dispatcher(&out), &interrupt).unwrap();

        assert_eq!(store.lines(), vec!["select 1".to_string()]);
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn test_history_listing_is_drawn_on_screen() {
        let store = MemoryLineStore::new(vec!["select 1".to_string()]);
        let mut engine = editor(&store);
        let out = SharedBuffer::default();
        let mut keys = script(&["history"]);
        let mut screen = Vec::new();

        run_session(&mut engine, &mut keys, &mut screen, dispatcher(&out), &Interrupt::new()).unwrap();

        let drawn = String::from_utf8(screen).unwrap();
        assert!(drawn.contains("1: select 1\r\n2: history\r\n"));
        assert_eq!(out.contents(), "");
    }
}

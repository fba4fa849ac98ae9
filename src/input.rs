/// Key Input Engine Module
///
/// Drives the line editor one decoded key at a time. Each key mutates the
/// `LineBuffer` and the history recall cursor and yields an `Outcome`: either
/// an instruction to redraw the line, or a completed line for the dispatcher.
///
/// States:
/// - *editing*: the default
/// - *browsing history*: entered with Up/Down, left on submission
use crate::history::HistoryStore;
use crate::line_buffer::LineBuffer;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Prompt shown before the edit buffer.
pub const PROMPT: &str = "> ";

static BANG_RECALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^!(\d+)$").expect("valid regex"));

/// A decoded key, independent of the terminal backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Key {
    Char(char),
    Left,
    Right,
    Up,
    Down,
    Backspace,
    LineStart,
    LineEnd,
    Enter,
    Interrupt,
}

impl Key {
    /// Maps a crossterm key event. Returns `None` for keys the editor ignores
    /// and for release/repeat events.
    pub fn from_event(event: KeyEvent) -> Option<Key> {
        if event.kind != KeyEventKind::Press {
            return None;
        }
        let control = event.modifiers.contains(KeyModifiers::CONTROL);
        match event.code {
            KeyCode::Char('a') if control => Some(Key::LineStart),
            KeyCode::Char('e') if control => Some(Key::LineEnd),
            KeyCode::Char('c') | KeyCode::Char('d') if control => Some(Key::Interrupt),
            KeyCode::Char(_) if control => None,
            KeyCode::Char(c) => Some(Key::Char(c)),
            KeyCode::Left => Some(Key::Left),
            KeyCode::Right => Some(Key::Right),
            KeyCode::Up => Some(Key::Up),
            KeyCode::Down => Some(Key::Down),
            KeyCode::Backspace => Some(Key::Backspace),
            KeyCode::Home => Some(Key::LineStart),
            KeyCode::End => Some(Key::LineEnd),
            KeyCode::Enter => Some(Key::Enter),
            KeyCode::Esc => Some(Key::Interrupt),
            _ => None,
        }
    }
}

/// A submitted line, after history substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A command for the dispatcher
    Command(String),
    /// Nothing typed; just re-prompt
    Blank,
    /// The `history` builtin, answered by the editor itself
    ShowHistory,
    /// `!<N>` naming an entry that does not exist
    Unresolved(usize),
}

/// What the caller should do after a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The line changed; redraw prompt and buffer
    Redraw,
    /// Nothing changed
    Unchanged,
    Submitted(Line),
    /// Persist history and stop listening
    Quit,
}

/// What to draw: prompt and buffer text, then move the cursor back
/// `cursor_back` cells from the end of the line.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLine {
    pub text: String,
    pub cursor_back: usize,
}

pub struct KeyInputEngine {
    buffer: LineBuffer,
    history: HistoryStore,
}

impl KeyInputEngine {
    pub fn new(history: HistoryStore) -> Self {
        KeyInputEngine {
            buffer: LineBuffer::new(),
            history,
        }
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    /// Applies one key to the editor state.
    pub fn handle_key(&mut self, key: Key) -> Outcome {
        match key {
            Key::Char(c) => {
                self.buffer.insert(c);
                Outcome::Redraw
            }
            Key::Left => changed(self.buffer.move_left()),
            Key::Right => changed(self.buffer.move_right()),
            Key::Backspace => changed(self.buffer.backspace()),
            Key::LineStart => {
                self.buffer.move_home();
                Outcome::Redraw
            }
            Key::LineEnd => {
                self.buffer.move_end();
                Outcome::Redraw
            }
            Key::Up => match self.history.recall_previous() {
                Some(entry) => {
                    self.buffer.replace(entry);
                    Outcome::Redraw
                }
                None => Outcome::Unchanged,
            },
            Key::Down => {
                if !self.history.is_browsing() {
                    return Outcome::Unchanged;
                }
                if let Some(entry) = self.history.recall_next() {
                    self.buffer.replace(entry);
                }
                Outcome::Redraw
            }
            Key::Enter => Outcome::Submitted(self.submit()),
            Key::Interrupt => Outcome::Quit,
        }
    }

    fn submit(&mut self) -> Line {
        let command = self.buffer.take();
        let line = if command.trim().is_empty() {
            Line::Blank
        } else if let Some(index) = bang_index(&command) {
            match index.checked_sub(1).and_then(|i| self.history.get(i)) {
                Some(entry) => {
                    let entry = entry.to_string();
                    debug!("Recalled history entry {}: {}", index, entry);
                    self.history.append(entry.clone());
                    Line::Command(entry)
                }
                None => Line::Unresolved(index),
            }
        } else {
            self.history.append(command.clone());
            if command.trim() == "history" {
                Line::ShowHistory
            } else {
                Line::Command(command)
            }
        };
        self.history.reset_cursor();
        line
    }

    /// The visible line for the current state.
    pub fn render(&self) -> RenderLine {
        RenderLine {
            text: format!("{}{}", PROMPT, self.buffer.as_string()),
            cursor_back: self.buffer.tail_len(),
        }
    }

    /// `N: command` lines, numbered the way `!<N>` expects.
    pub fn history_listing(&self) -> Vec<String> {
        self.history
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{}: {}", i + 1, entry))
            .collect()
    }
}

fn changed(moved: bool) -> Outcome {
    if moved {
        Outcome::Redraw
    } else {
        Outcome::Unchanged
    }
}

/// The 1-based index in a `!<N>` reference.
fn bang_index(command: &str) -> Option<usize> {
    BANG_RECALL
        .captures(command.trim())
        .and_then(|caps| caps[1].parse().ok())
}

//! Terminal plumbing for the line editor: where keys come from and how the
//! edited line is drawn.
use crate::core::{Interrupt, Result, ShellError};
use crate::input::{Key, RenderLine};
use crossterm::cursor::{MoveLeft, MoveToColumn};
use crossterm::event::{self, Event};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::QueueableCommand;
use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

/// How long a key read blocks before the interrupt flag is checked again.
const KEY_POLL: Duration = Duration::from_millis(50);

/// A stream of decoded keys.
pub trait KeySource {
    /// Blocks for the next key. `Ok(None)` means the stream has ended.
    fn next_key(&mut self) -> Result<Option<Key>>;

    /// Hands the terminal back in normal mode while a command runs.
    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }

    /// Takes the terminal back for key-by-key input.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads keys from the controlling terminal in raw mode. The stream ends
/// once `interrupt` is raised.
pub struct CrosstermKeys {
    raw: bool,
    interrupt: Interrupt,
}

impl CrosstermKeys {
    pub fn new(interrupt: Interrupt) -> Result<Self> {
        let mut keys = CrosstermKeys {
            raw: false,
            interrupt,
        };
        keys.resume()?;
        Ok(keys)
    }
}

impl KeySource for CrosstermKeys {
    fn next_key(&mut self) -> Result<Option<Key>> {
        loop {
            if self.interrupt.is_raised() {
                debug!("Key stream interrupted");
                return Ok(None);
            }
            if !event::poll(KEY_POLL).map_err(|e| ShellError::Input(e.to_string()))? {
                continue;
            }
            let event = event::read().map_err(|e| ShellError::Input(e.to_string()))?;
            match event {
                Event::Key(key_event) => {
                    if let Some(key) = Key::from_event(key_event) {
                        return Ok(Some(key));
                    }
                }
                other => debug!("Skipping terminal event {:?}", other),
            }
        }
    }

    fn suspend(&mut self) -> Result<()> {
        if self.raw {
            terminal::disable_raw_mode()?;
            self.raw = false;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if !self.raw {
            terminal::enable_raw_mode()?;
            self.raw = true;
        }
        Ok(())
    }
}

impl Drop for CrosstermKeys {
    fn drop(&mut self) {
        if self.raw {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// A fixed key sequence, for scripted sessions.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    keys: VecDeque<Key>,
}

impl ScriptedKeys {
    pub fn new<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        ScriptedKeys {
            keys: keys.into_iter().collect(),
        }
    }

    /// Keys for typing `text` and pressing Enter.
    pub fn line(text: &str) -> Vec<Key> {
        let mut keys: Vec<Key> = text.chars().map(Key::Char).collect();
        keys.push(Key::Enter);
        keys
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self) -> Result<Option<Key>> {
        Ok(self.keys.pop_front())
    }
}

/// Redraws the whole line: back to column 0, clear, print, then step the
/// cursor back from the end so it sits where the buffer cursor is.
pub fn draw_line<W: Write>(out: &mut W, line: &RenderLine) -> Result<()> {
    out.queue(MoveToColumn(0))?
        .queue(Clear(ClearType::CurrentLine))?
        .queue(Print(&line.text))?;
    if line.cursor_back > 0 {
        let back = u16::try_from(line.cursor_back).unwrap_or(u16::MAX);
        out.queue(MoveLeft(back))?;
    }
    out.flush()?;
    Ok(())
}

/// Ends the current line. Works in raw mode, where `\n` alone does not
/// return the carriage.
pub fn new_line<W: Write>(out: &mut W) -> Result<()> {
    out.write_all(b"\r\n")?;
    out.flush()?;
    Ok(())
}

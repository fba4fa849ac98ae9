// Line Buffer Module
//
// The editable input line: a sequence of characters plus a cursor offset.
// Pure data structure, no terminal I/O. The cursor always stays within
// `0..=len`, and every edit happens at the cursor without disturbing the
// characters after it.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineBuffer {
    chars: Vec<char>,
    cursor: usize,
}

impl LineBuffer {
    /// Creates an empty buffer with the cursor at 0.
    pub fn new() -> Self {
        LineBuffer {
            chars: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of characters between the cursor and the end of the line.
    pub fn tail_len(&self) -> usize {
        self.chars.len() - self.cursor
    }

    /// Inserts `c` at the cursor, shifting the tail right, and advances the cursor.
    pub fn insert(&mut self, c: char) {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    /// Removes the character before the cursor. Returns false at the start of the line.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.chars.len();
    }

    /// Replaces the contents, leaving the cursor at the end.
    pub fn replace(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.cursor = self.chars.len();
    }

    /// Freezes the contents into a string and resets to an empty buffer.
    pub fn take(&mut self) -> String {
        let text = self.as_string();
        self.chars.clear();
        self.cursor = 0;
        text
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

//! Editable text surfaces for edit sessions and forms.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    value: String,
    cursor: usize,
}

impl TextBuffer {
    /// Cursor starts at the end of the seeded content.
    pub fn new(value: &str) -> Self {
        TextBuffer {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_char(self.cursor, &self.value);
    }

    pub fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_char(self.cursor, &self.value);
    }

    pub fn move_up(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx == 0 {
            return;
        }
        self.cursor = index_at_col(&self.value, line_starts[line_idx - 1], col);
    }

    pub fn move_down(&mut self) {
        let (line_starts, line_idx, col) = line_state(&self.value, self.cursor);
        if line_idx + 1 >= line_starts.len() {
            return;
        }
        self.cursor = index_at_col(&self.value, line_starts[line_idx + 1], col);
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_char(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    pub fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    pub fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

/// One editable row per list entry, with a focused row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineList {
    lines: Vec<TextBuffer>,
    focus: usize,
}

impl LineList {
    /// An empty seed still yields one blank row to type into. Focus lands on
    /// the end of the first row.
    pub fn new<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut lines: Vec<TextBuffer> = lines.into_iter().map(TextBuffer::new).collect();
        if lines.is_empty() {
            lines.push(TextBuffer::new(""));
        }
        LineList { lines, focus: 0 }
    }

    pub fn lines(&self) -> &[TextBuffer] {
        &self.lines
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn focused_mut(&mut self) -> &mut TextBuffer {
        &mut self.lines[self.focus]
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(TextBuffer::value)
    }

    pub fn focus_prev(&mut self) {
        self.focus = self.focus.saturating_sub(1);
    }

    pub fn focus_next(&mut self) {
        if self.focus + 1 < self.lines.len() {
            self.focus += 1;
        }
    }

    /// Enter: a new blank row right after the focused one.
    pub fn split(&mut self) {
        self.lines.insert(self.focus + 1, TextBuffer::new(""));
        self.focus += 1;
    }

    /// Backspace: deletes a character, or the whole row when it is blank.
    /// Returns `true` when the list has collapsed to nothing, which ends
    /// the edit.
    pub fn backspace(&mut self) -> bool {
        let row = &mut self.lines[self.focus];
        if !row.value().is_empty() {
            row.backspace();
            return false;
        }
        if self.lines.len() <= 1 {
            return true;
        }
        self.lines.remove(self.focus);
        self.focus = self.focus.saturating_sub(1).min(self.lines.len() - 1);
        false
    }
}

fn prev_char(cursor: usize, text: &str) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut prev = 0;
    for (idx, _) in text.char_indices() {
        if idx >= cursor {
            break;
        }
        prev = idx;
    }
    prev
}

fn next_char(cursor: usize, text: &str) -> usize {
    for (idx, ch) in text.char_indices() {
        if idx > cursor {
            return idx;
        }
        if idx == cursor {
            return cursor + ch.len_utf8();
        }
    }
    text.len()
}

fn line_state(text: &str, cursor: usize) -> (Vec<usize>, usize, usize) {
    let mut starts = vec![0];
    for (idx, ch) in text.char_indices() {
        if ch == '\n' {
            starts.push(idx + 1);
        }
    }
    let line_idx = starts.iter().rposition(|start| *start <= cursor).unwrap_or(0);
    let col = text[starts[line_idx]..cursor].chars().count();
    (starts, line_idx, col)
}

fn index_at_col(text: &str, start: usize, target_col: usize) -> usize {
    let slice = &text[start..];
    let limit = slice.find('\n').unwrap_or(slice.len());
    slice[..limit]
        .char_indices()
        .nth(target_col)
        .map(|(idx, _)| start + idx)
        .unwrap_or(start + limit)
}

//! The idle/editing state machine shared by the tasks, notes and links
//! modules.

use crate::buffer::{LineList, TextBuffer};
use crate::model::{merge_task_lines, normalize_lines, DashboardState};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Tasks,
    Notes,
    Links,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditBuffer {
    Lines(LineList),
    Text(TextBuffer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Editing { slice: Slice, buffer: EditBuffer },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    state: SessionState,
    suppress_close: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub slice: Slice,
    pub state: DashboardState,
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Slice {
    pub fn label(&self) -> &'static str {
        match self {
            Slice::Tasks => "tasks",
            Slice::Notes => "notes",
            Slice::Links => "links",
        }
    }
}

impl EditSession {
    pub fn new() -> Self {
        EditSession {
            state: SessionState::Idle,
            suppress_close: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, SessionState::Editing { .. })
    }

    pub fn editing_slice(&self) -> Option<Slice> {
        match &self.state {
            SessionState::Editing { slice, .. } => Some(*slice),
            SessionState::Idle => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut EditBuffer> {
        match &mut self.state {
            SessionState::Editing { buffer, .. } => Some(buffer),
            SessionState::Idle => None,
        }
    }

    /// Opens an editor seeded from `current`. Does nothing when a session is
    /// already open or the module is not on screen.
    pub fn enter(&mut self, slice: Slice, current: &DashboardState, target_present: bool) -> bool {
        if self.is_editing() || !target_present {
            return false;
        }
        let buffer = match slice {
            Slice::Tasks => EditBuffer::Lines(LineList::new(
                current.tasks.iter().map(|t| t.text.as_str()),
            )),
            Slice::Notes => EditBuffer::Text(TextBuffer::new(&current.notes)),
            Slice::Links => EditBuffer::Text(TextBuffer::new(&current.links.join("\n"))),
        };
        debug!(slice = slice.label(), "edit session opened");
        self.state = SessionState::Editing { slice, buffer };
        self.suppress_close = true;
        true
    }

    /// Called once the event that opened the session has been handled.
    pub fn settle(&mut self) {
        self.suppress_close = false;
    }

    /// Whether a click outside the editor should end the session now.
    pub fn closes_on_outside_click(&self) -> bool {
        self.is_editing() && !self.suppress_close
    }

    /// Ends the session and folds the edited text into `current`. Returns
    /// `None` when idle or when the module is gone from the screen, in
    /// which case the session stays open.
    pub fn commit(&mut self, current: &DashboardState, target_present: bool) -> Option<Commit> {
        if !self.is_editing() || !target_present {
            return None;
        }
        let SessionState::Editing { slice, buffer } =
            std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return None;
        };
        self.suppress_close = false;
        let mut next = current.clone();
        match (slice, &buffer) {
            (Slice::Tasks, EditBuffer::Lines(list)) => {
                next.tasks = merge_task_lines(&current.tasks, list.texts());
            }
            (Slice::Tasks, EditBuffer::Text(text)) => {
                next.tasks = merge_task_lines(&current.tasks, text.value().lines());
            }
            (Slice::Notes, buffer) => {
                next.notes = normalize_lines(buffer_lines(buffer)).join("\n");
            }
            (Slice::Links, buffer) => {
                next.links = normalize_lines(buffer_lines(buffer));
            }
        }
        debug!(slice = slice.label(), "edit session committed");
        Some(Commit { slice, state: next })
    }
}

fn buffer_lines(buffer: &EditBuffer) -> Vec<&str> {
    match buffer {
        EditBuffer::Lines(list) => list.texts().collect(),
        EditBuffer::Text(text) => text.value().lines().collect(),
    }
}

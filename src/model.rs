use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DashboardState {
    pub tasks: Vec<Task>,
    pub notes: String,
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub label: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: String,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Task {
            text: text.into(),
            completed: false,
        }
    }
}

impl DashboardState {
    pub fn open_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.completed)
    }

    pub fn completed_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.completed)
    }

    pub fn toggle_task(&mut self, index: usize) -> Option<bool> {
        let task = self.tasks.get_mut(index)?;
        task.completed = !task.completed;
        Some(task.completed)
    }

    /// Drops the day's working content; location survives.
    pub fn clear_day(&mut self) {
        self.tasks.clear();
        self.notes.clear();
        self.links.clear();
    }
}

/// A task entry as it may appear on disk. Older documents stored bare
/// strings; newer ones store records.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredTask {
    Legacy(String),
    Record { text: Option<String>, completed: bool },
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredNotes {
    Text(String),
    Lines(Vec<Value>),
    Missing,
}

/// The dashboard document after parsing but before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub tasks: Vec<StoredTask>,
    pub notes: StoredNotes,
    pub links: Vec<Value>,
    pub location: Option<Value>,
}

impl From<Value> for StoredTask {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => StoredTask::Legacy(text),
            Value::Object(map) => StoredTask::Record {
                text: map.get("text").and_then(Value::as_str).map(str::to_string),
                completed: map.get("completed").map(truthy).unwrap_or(false),
            },
            _ => StoredTask::Malformed,
        }
    }
}

impl From<Option<Value>> for StoredNotes {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(Value::String(text)) => StoredNotes::Text(text),
            Some(Value::Array(lines)) => StoredNotes::Lines(lines),
            _ => StoredNotes::Missing,
        }
    }
}

impl StoredDocument {
    /// Returns `None` when the document is not a JSON object at all.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        let tasks = match map.remove("tasks") {
            Some(Value::Array(items)) => items.into_iter().map(StoredTask::from).collect(),
            _ => Vec::new(),
        };
        let links = match map.remove("links") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        Some(StoredDocument {
            tasks,
            notes: StoredNotes::from(map.remove("notes")),
            links,
            location: map.remove("location"),
        })
    }

    pub fn migrate(self) -> DashboardState {
        DashboardState {
            tasks: normalize_tasks(self.tasks),
            notes: normalize_notes(self.notes),
            links: normalize_lines(self.links.iter().filter_map(Value::as_str)),
            location: self.location.and_then(location_from_value),
        }
    }
}

pub fn normalize_tasks(entries: Vec<StoredTask>) -> Vec<Task> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            StoredTask::Legacy(text) => Some((text, false)),
            StoredTask::Record {
                text: Some(text),
                completed,
            } => Some((text, completed)),
            StoredTask::Record { text: None, .. } | StoredTask::Malformed => None,
        })
        .filter_map(|(text, completed)| {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(Task {
                    text: text.to_string(),
                    completed,
                })
            }
        })
        .collect()
}

pub fn normalize_notes(notes: StoredNotes) -> String {
    match notes {
        StoredNotes::Text(text) => normalize_lines(text.lines()).join("\n"),
        StoredNotes::Lines(lines) => {
            normalize_lines(lines.iter().filter_map(Value::as_str)).join("\n")
        }
        StoredNotes::Missing => String::new(),
    }
}

pub fn normalize_lines<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rebuilds the task list from edited lines. Completion flags follow
/// position: line `i` keeps the flag of the task previously at `i`.
pub fn merge_task_lines<'a, I>(previous: &[Task], lines: I) -> Vec<Task>
where
    I: IntoIterator<Item = &'a str>,
{
    normalize_lines(lines)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Task {
            text,
            completed: previous.get(idx).map(|t| t.completed).unwrap_or(false),
        })
        .collect()
}

fn location_from_value(value: Value) -> Option<Location> {
    let map = value.as_object()?;
    Some(Location {
        label: map.get("label")?.as_str()?.to_string(),
        lat: map.get("lat")?.as_f64()?,
        lon: map.get("lon")?.as_f64()?,
        timezone: map.get("timezone")?.as_str()?.to_string(),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

//! End-of-day shutdown: snapshot the dashboard, archive it as a Google Doc,
//! mail it, then clear the day.

use crate::cache::Cached;
use crate::calendar::CalendarPayload;
use crate::clock::{format_time, local_time, zone_name};
use crate::codec;
use crate::config::{GoogleConfig, TemperatureUnit};
use crate::error::{FetchError, ShutdownError, ShutdownStep, StorageError};
use crate::model::DashboardState;
use crate::oauth::{self, Prompt, ScopeSet};
use crate::storage::KeyValueStore;
use crate::weather::WeatherReport;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";
const DOCS_ENDPOINT: &str = "https://docs.googleapis.com/v1/documents";
const SEND_ENDPOINT: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";

pub const ROOT_FOLDER: &str = "Lookout";
pub const SHUTDOWN_FOLDER: &str = "Shutdowns";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflections {
    pub went_well: String,
    pub didnt_go: String,
    pub remaining: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// `2026-01-15`
    pub date: String,
    pub timestamp: String,
    pub time: String,
    pub timezone: String,
}

/// Everything the shutdown document records about the day, frozen at one
/// instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub header: SnapshotHeader,
    pub location: String,
    pub weather: String,
    pub open_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub notes: String,
    pub links: Vec<String>,
    pub calendar: Vec<String>,
}

impl ContextSnapshot {
    pub fn capture(
        state: &DashboardState,
        weather: Option<&Cached<WeatherReport>>,
        calendar: Option<&Cached<CalendarPayload>>,
        unit: TemperatureUnit,
        now: DateTime<Utc>,
    ) -> Self {
        let location = state.location.as_ref();
        let local = local_time(now, location);
        ContextSnapshot {
            header: SnapshotHeader {
                date: local.format("%Y-%m-%d").to_string(),
                timestamp: local.format("%A, %B %-d, %Y at %-I:%M %p").to_string(),
                time: format_time(&local),
                timezone: zone_name(location),
            },
            location: location.map(|l| l.label.clone()).unwrap_or_default(),
            weather: weather
                .and_then(|w| w.payload.summary(unit))
                .unwrap_or_default(),
            open_tasks: state.open_tasks().map(|t| t.text.clone()).collect(),
            completed_tasks: state.completed_tasks().map(|t| t.text.clone()).collect(),
            notes: state.notes.clone(),
            links: state.links.clone(),
            calendar: calendar
                .map(|c| {
                    c.payload
                        .items
                        .iter()
                        .map(|item| format!("{} — {}", item.time, item.title))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn document_title(&self) -> String {
        format!("Lookout Shutdown — {}", self.header.date)
    }

    pub fn mail_subject(&self) -> String {
        format!("End of Day — {}", self.header.date)
    }

    /// The archived document body.
    pub fn document_text(&self, reflections: &Reflections) -> String {
        let mut lines = vec![
            format!("Date: {}", self.header.date),
            format!("Timestamp: {}", self.header.timestamp),
            format!("Time: {}", self.header.time),
        ];
        if !self.location.is_empty() {
            lines.push(format!("Location: {}", self.location));
        }
        if !self.header.timezone.is_empty() {
            lines.push(format!("Timezone: {}", self.header.timezone));
        }
        if !self.weather.is_empty() {
            lines.push(format!("Weather: {}", self.weather));
        }
        for (heading, answer) in [
            ("What went well today?", &reflections.went_well),
            ("What didn’t go as expected?", &reflections.didnt_go),
            ("Tasks remaining for tomorrow", &reflections.remaining),
        ] {
            lines.push(String::new());
            lines.push(format!("Reflection — {heading}"));
            lines.push(answer.clone());
        }
        push_section(&mut lines, "Tasks (Open):", &self.open_tasks);
        push_section(&mut lines, "Tasks (Completed):", &self.completed_tasks);
        lines.push(String::new());
        lines.push("Notes:".into());
        lines.push(self.notes.clone());
        push_section(&mut lines, "Links:", &self.links);
        push_section(&mut lines, "Calendar (Today):", &self.calendar);
        lines.join("\n")
    }

    /// The shorter preview shown above the reflection prompts. Empty
    /// sections are left out.
    pub fn preview_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Date: {}", self.header.date),
            format!("Time: {}", self.header.time),
        ];
        if !self.location.is_empty() {
            lines.push(format!("Location: {}", self.location));
        }
        if !self.weather.is_empty() {
            lines.push(format!("Weather: {}", self.weather));
        }
        for (heading, items) in [
            ("Calendar:", &self.calendar),
            ("Open tasks:", &self.open_tasks),
            ("Completed tasks:", &self.completed_tasks),
        ] {
            if !items.is_empty() {
                lines.push(heading.to_string());
                lines.extend(items.iter().map(|item| format!("• {item}")));
            }
        }
        if !self.notes.is_empty() {
            lines.push("Notes:".into());
            lines.extend(self.notes.lines().map(str::to_string));
        }
        if !self.links.is_empty() {
            lines.push("Links:".into());
            lines.extend(self.links.iter().map(|link| format!("• {link}")));
        }
        lines
    }
}

fn push_section(lines: &mut Vec<String>, heading: &str, items: &[String]) {
    lines.push(String::new());
    lines.push(heading.to_string());
    if items.is_empty() {
        lines.push("—".into());
    } else {
        lines.extend(items.iter().map(|item| format!("- {item}")));
    }
}

/// The Drive, Docs and Gmail calls the pipeline needs.
pub trait Workspace {
    fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>, FetchError>;
    fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, FetchError>;
    fn create_document(&self, title: &str, parent: &str) -> Result<String, FetchError>;
    fn insert_text(&self, document_id: &str, text: &str) -> Result<(), FetchError>;
    fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<(), FetchError>;
}

/// Runs every remote step in order and stops at the first failure. Nothing
/// already created is rolled back. Returns the new document id.
pub fn run_pipeline(
    workspace: &dyn Workspace,
    recipient: &str,
    snapshot: &ContextSnapshot,
    reflections: &Reflections,
) -> Result<String, ShutdownError> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Err(ShutdownError::new(
            ShutdownStep::SendMail,
            FetchError::Payload("no shutdown recipient configured".into()),
        ));
    }
    let content = snapshot.document_text(reflections);

    let root = folder(workspace, ROOT_FOLDER, None)
        .map_err(|e| ShutdownError::new(ShutdownStep::LookoutFolder, e))?;
    let archive = folder(workspace, SHUTDOWN_FOLDER, Some(&root))
        .map_err(|e| ShutdownError::new(ShutdownStep::ShutdownsFolder, e))?;
    let document_id = workspace
        .create_document(&snapshot.document_title(), &archive)
        .map_err(|e| ShutdownError::new(ShutdownStep::CreateDocument, e))?;
    workspace
        .insert_text(&document_id, &content)
        .map_err(|e| ShutdownError::new(ShutdownStep::InsertText, e))?;
    workspace
        .send_mail(recipient, &snapshot.mail_subject(), &content)
        .map_err(|e| ShutdownError::new(ShutdownStep::SendMail, e))?;

    info!(document = %document_id, "shutdown archived and mailed");
    Ok(document_id)
}

/// Find-or-create. A failed lookup still falls through to creation.
fn folder(workspace: &dyn Workspace, name: &str, parent: Option<&str>) -> Result<String, FetchError> {
    match workspace.find_folder(name, parent) {
        Ok(Some(id)) => return Ok(id),
        Ok(None) => {}
        Err(err) => warn!(folder = name, error = %err, "folder lookup failed, creating"),
    }
    workspace.create_folder(name, parent)
}

/// Clears the day's content on top of whatever is stored now and saves it.
pub fn close_day(store: &dyn KeyValueStore) -> Result<DashboardState, StorageError> {
    let mut state = codec::load(store).state;
    state.clear_day();
    codec::save(store, &state)?;
    Ok(state)
}

/// A usable workspace token, running the browser flow when there is none.
pub fn workspace_token(
    config: &GoogleConfig,
    session: &dyn KeyValueStore,
    now_ms: i64,
) -> Result<String, ShutdownError> {
    if let Some(token) = oauth::usable_token(session, ScopeSet::Workspace, now_ms) {
        return Ok(token.access_token);
    }
    match oauth::authorize(config, session, ScopeSet::Workspace, Prompt::Consent) {
        Ok(Some(token)) => Ok(token.access_token),
        Ok(None) => Err(ShutdownError::new(ShutdownStep::Authorize, FetchError::AuthRequired)),
        Err(err) => {
            warn!(error = %err, "workspace authorization failed");
            Err(ShutdownError::new(ShutdownStep::Authorize, FetchError::AuthRequired))
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleWorkspace {
    client: Client,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: Option<String>,
}

impl GoogleWorkspace {
    pub fn new(access_token: impl Into<String>) -> Self {
        GoogleWorkspace {
            client: Client::new(),
            access_token: access_token.into(),
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<reqwest::blocking::Response, FetchError> {
        let response = request.bearer_auth(&self.access_token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn create_file(&self, body: serde_json::Value) -> Result<String, FetchError> {
        let created: FileRef = self
            .send(self.client.post(FILES_ENDPOINT).json(&body))?
            .json()?;
        created
            .id
            .ok_or_else(|| FetchError::Payload("created file has no id".into()))
    }
}

pub fn folder_query(name: &str, parent: Option<&str>) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and trashed = false and '{}' in parents",
        name.replace('\'', "\\'"),
        FOLDER_MIME,
        parent.unwrap_or("root")
    )
}

pub fn encode_mail(to: &str, subject: &str, body: &str) -> String {
    let raw = format!(
        "To: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{body}"
    );
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

impl Workspace for GoogleWorkspace {
    fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>, FetchError> {
        let query = folder_query(name, parent);
        let request = self
            .client
            .get(FILES_ENDPOINT)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")]);
        let list: FileList = self.send(request)?.json()?;
        Ok(list.files.into_iter().find_map(|f| f.id))
    }

    fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, FetchError> {
        let mut body = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            body["parents"] = json!([parent]);
        }
        self.create_file(body)
    }

    fn create_document(&self, title: &str, parent: &str) -> Result<String, FetchError> {
        self.create_file(json!({
            "name": title,
            "mimeType": DOCUMENT_MIME,
            "parents": [parent],
        }))
    }

    fn insert_text(&self, document_id: &str, text: &str) -> Result<(), FetchError> {
        let url = format!("{DOCS_ENDPOINT}/{document_id}:batchUpdate");
        let body = json!({
            "requests": [{
                "insertText": { "location": { "index": 1 }, "text": text }
            }]
        });
        self.send(self.client.post(url).json(&body))?;
        Ok(())
    }

    fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<(), FetchError> {
        let raw = encode_mail(to, subject, body);
        self.send(self.client.post(SEND_ENDPOINT).json(&json!({ "raw": raw })))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Appointment;
    use crate::model::{Location, Task};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeWorkspace {
        calls: RefCell<Vec<String>>,
        existing_root: Option<String>,
        fail_at: Option<&'static str>,
    }

    impl FakeWorkspace {
        fn record(&self, call: &'static str, detail: String) -> Result<(), FetchError> {
            self.calls.borrow_mut().push(format!("{call}:{detail}"));
            if self.fail_at == Some(call) {
                return Err(FetchError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }

    impl Workspace for FakeWorkspace {
        fn find_folder(&self, name: &str, _parent: Option<&str>) -> Result<Option<String>, FetchError> {
            self.record("find", name.to_string())?;
            Ok(if name == ROOT_FOLDER {
                self.existing_root.clone()
            } else {
                None
            })
        }

        fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, FetchError> {
            self.record("folder", format!("{name}<{}", parent.unwrap_or("root")))?;
            Ok(format!("id-{name}"))
        }

        fn create_document(&self, title: &str, parent: &str) -> Result<String, FetchError> {
            self.record("doc", format!("{title}<{parent}"))?;
            Ok("doc-1".into())
        }

        fn insert_text(&self, document_id: &str, _text: &str) -> Result<(), FetchError> {
            self.record("insert", document_id.to_string())
        }

        fn send_mail(&self, to: &str, subject: &str, _body: &str) -> Result<(), FetchError> {
            self.record("mail", format!("{to}|{subject}"))
        }
    }

    fn snapshot() -> ContextSnapshot {
        let state = DashboardState {
            tasks: vec![
                Task::new("write report"),
                Task {
                    text: "standup".into(),
                    completed: true,
                },
            ],
            notes: "ship it".into(),
            links: vec![],
            location: Some(Location {
                label: "New Orleans".into(),
                lat: 29.95,
                lon: -90.07,
                timezone: "America/Chicago".into(),
            }),
        };
        let weather = Cached::new(WeatherReport::new(71.6, 0), 0);
        let calendar = Cached::new(
            CalendarPayload {
                items: vec![Appointment {
                    time: "9:30 AM".into(),
                    title: "Standup".into(),
                }],
            },
            0,
        );
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 23, 0, 0).unwrap();
        ContextSnapshot::capture(
            &state,
            Some(&weather),
            Some(&calendar),
            TemperatureUnit::Fahrenheit,
            now,
        )
    }

    #[test]
    fn snapshot_is_taken_in_location_zone() {
        let snap = snapshot();
        assert_eq!(snap.header.date, "2026-01-15");
        assert_eq!(snap.header.time, "5:00 PM");
        assert_eq!(snap.header.timestamp, "Thursday, January 15, 2026 at 5:00 PM");
        assert_eq!(snap.header.timezone, "America/Chicago");
        assert_eq!(snap.weather, "72°F, Clear sky");
        assert_eq!(snap.calendar, vec!["9:30 AM — Standup"]);
        assert_eq!(snap.document_title(), "Lookout Shutdown — 2026-01-15");
    }

    #[test]
    fn document_text_lists_every_section() {
        let text = snapshot().document_text(&Reflections {
            went_well: "focus".into(),
            ..Reflections::default()
        });
        assert!(text.starts_with("Date: 2026-01-15\nTimestamp: "));
        assert!(text.contains("Location: New Orleans\nTimezone: America/Chicago\nWeather: 72°F, Clear sky"));
        assert!(text.contains("Reflection — What went well today?\nfocus\n"));
        assert!(text.contains("Tasks (Open):\n- write report\n"));
        assert!(text.contains("Tasks (Completed):\n- standup\n"));
        assert!(text.contains("Links:\n—\n"));
        assert!(text.ends_with("Calendar (Today):\n- 9:30 AM — Standup"));
    }

    #[test]
    fn preview_skips_empty_sections() {
        let lines = snapshot().preview_lines();
        assert!(lines.contains(&"• write report".to_string()));
        assert!(!lines.contains(&"Links:".to_string()));
    }

    #[test]
    fn pipeline_runs_in_order() {
        let workspace = FakeWorkspace {
            existing_root: Some("root-9".into()),
            ..FakeWorkspace::default()
        };
        let id = run_pipeline(&workspace, "me@example.com", &snapshot(), &Reflections::default())
            .unwrap();
        assert_eq!(id, "doc-1");
        assert_eq!(
            workspace.calls.into_inner(),
            vec![
                "find:Lookout",
                "find:Shutdowns",
                "folder:Shutdowns<root-9",
                "doc:Lookout Shutdown — 2026-01-15<id-Shutdowns",
                "insert:doc-1",
                "mail:me@example.com|End of Day — 2026-01-15",
            ]
        );
    }

    #[test]
    fn pipeline_stops_at_first_failure() {
        let workspace = FakeWorkspace {
            fail_at: Some("doc"),
            ..FakeWorkspace::default()
        };
        let err = run_pipeline(&workspace, "me@example.com", &snapshot(), &Reflections::default())
            .unwrap_err();
        assert_eq!(err.step, ShutdownStep::CreateDocument);
        let calls = workspace.calls.into_inner();
        assert!(calls.last().unwrap().starts_with("doc:"));
        assert!(!calls.iter().any(|c| c.starts_with("mail:")));
    }

    #[test]
    fn failed_lookup_falls_back_to_create() {
        let workspace = FakeWorkspace {
            fail_at: Some("find"),
            ..FakeWorkspace::default()
        };
        assert!(run_pipeline(&workspace, "me@example.com", &snapshot(), &Reflections::default()).is_ok());
    }

    #[test]
    fn missing_recipient_stops_before_any_call() {
        let workspace = FakeWorkspace::default();
        let err = run_pipeline(&workspace, "  ", &snapshot(), &Reflections::default()).unwrap_err();
        assert_eq!(err.step, ShutdownStep::SendMail);
        assert!(workspace.calls.into_inner().is_empty());
    }

    #[test]
    fn close_day_keeps_location() {
        let store = MemoryStore::new();
        let state = DashboardState {
            tasks: vec![Task::new("a")],
            notes: "n".into(),
            links: vec!["l".into()],
            location: snapshot_location(),
        };
        codec::save(&store, &state).unwrap();
        let cleared = close_day(&store).unwrap();
        assert!(cleared.tasks.is_empty() && cleared.notes.is_empty() && cleared.links.is_empty());
        assert_eq!(codec::load(&store).state, cleared);
        assert!(cleared.location.is_some());
    }

    fn snapshot_location() -> Option<Location> {
        Some(Location {
            label: "Home".into(),
            lat: 1.0,
            lon: 2.0,
            timezone: "UTC".into(),
        })
    }

    #[test]
    fn folder_query_escapes_quotes() {
        assert_eq!(
            folder_query("Jo's", Some("p1")),
            "name = 'Jo\\'s' and mimeType = 'application/vnd.google-apps.folder' and trashed = false and 'p1' in parents"
        );
    }

    #[test]
    fn mail_is_url_safe_base64() {
        let raw = encode_mail("a@b.c", "Hi", "body?>");
        assert!(!raw.contains('+') && !raw.contains('/') && !raw.contains('='));
        let decoded = URL_SAFE_NO_PAD.decode(raw).unwrap();
        assert!(String::from_utf8(decoded).unwrap().starts_with("To: a@b.c\r\nSubject: Hi\r\n"));
    }
}

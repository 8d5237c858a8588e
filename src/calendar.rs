use crate::clock::{format_time, parse_zone};
use crate::error::FetchError;
use crate::model::Location;
use crate::oauth::{usable_token, ScopeSet};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const EVENTS_ENDPOINT: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const MAX_RESULTS: &str = "10";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub time: String,
    pub title: String,
}

/// What the calendar cache holds besides `fetchedAt`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CalendarPayload {
    pub items: Vec<Appointment>,
}

pub trait CalendarSource: Send + Sync {
    fn today(&self, access_token: &str, zone: Tz, now: DateTime<Utc>)
        -> Result<CalendarPayload, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct GoogleCalendarClient {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EventList {
    items: Option<Vec<Event>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Event {
    summary: Option<String>,
    start: Option<EventStart>,
}

#[derive(Debug, Deserialize)]
struct EventStart {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
}

impl GoogleCalendarClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalendarSource for GoogleCalendarClient {
    fn today(
        &self,
        access_token: &str,
        zone: Tz,
        now: DateTime<Utc>,
    ) -> Result<CalendarPayload, FetchError> {
        let (time_min, time_max) = day_window(zone, now.with_timezone(&zone).date_naive());
        let url = Url::parse_with_params(
            EVENTS_ENDPOINT,
            [
                ("timeMin", time_min.to_rfc3339()),
                ("timeMax", time_max.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", MAX_RESULTS.to_string()),
            ],
        )
        .map_err(|err| FetchError::Payload(format!("invalid events url: {err}")))?;

        debug!(%url, "fetching calendar events");
        let response = self.client.get(url).bearer_auth(access_token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let list: EventList = response.json()?;
        let items = list
            .items
            .ok_or_else(|| FetchError::Payload("events response without items".into()))?;
        Ok(CalendarPayload {
            items: appointments(items, zone),
        })
    }
}

/// Today's appointments for `location`. Without a usable calendar token
/// this fails rather than starting an authorization.
pub fn fetch_today(
    source: &dyn CalendarSource,
    session: &dyn KeyValueStore,
    location: &Location,
    now: DateTime<Utc>,
) -> Result<CalendarPayload, FetchError> {
    let token = usable_token(session, ScopeSet::Calendar, now.timestamp_millis())
        .ok_or(FetchError::AuthRequired)?;
    let zone = parse_zone(&location.timezone)
        .ok_or_else(|| FetchError::Location(format!("unknown time zone {}", location.timezone)))?;
    source.today(&token.access_token, zone, now)
}

/// Midnight to midnight of `date` in `zone`, as UTC instants.
pub fn day_window(zone: Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(zone, date);
    let end = date
        .succ_opt()
        .map(|next| local_midnight(zone, next))
        .unwrap_or(start + Duration::days(1));
    (start, end)
}

fn local_midnight(zone: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    // some zones skip midnight on DST days; take the first hour that exists
    (0..3)
        .find_map(|h| {
            zone.from_local_datetime(&(midnight + Duration::hours(h)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Keeps timed events only; all-day entries carry `start.date` instead.
pub(crate) fn appointments(events: Vec<Event>, zone: Tz) -> Vec<Appointment> {
    events
        .into_iter()
        .filter_map(|event| {
            let raw = event.start?.date_time?;
            let start = DateTime::parse_from_rfc3339(&raw).ok()?;
            let title = event
                .summary
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            Some(Appointment {
                time: format_time(&start.with_timezone(&zone)),
                title,
            })
        })
        .collect()
}

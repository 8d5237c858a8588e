//! Turns normalized state into display rows. Everything here is a pure
//! function of its input, so rendering the same state twice gives the same
//! rows.

use crate::cache::Cached;
use crate::calendar::CalendarPayload;
use crate::config::TemperatureUnit;
use crate::model::Task;
use crate::weather::WeatherReport;
use ratatui::prelude::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

pub const NO_TASKS: &str = "Nothing pressing.";
pub const NO_LINKS: &str = "—";
pub const DAY_IS_OPEN: &str = "Your day is open.";
pub const CALENDAR_OFFLINE: &str = "Calendar not connected.";
pub const WEATHER_PENDING: &str = "…";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Open(String),
    Done(String),
    Text(String),
    Timed { time: String, title: String },
    Placeholder(&'static str),
}

pub fn task_entries(tasks: &[Task]) -> Vec<Entry> {
    if tasks.is_empty() {
        return vec![Entry::Placeholder(NO_TASKS)];
    }
    tasks
        .iter()
        .map(|task| {
            if task.completed {
                Entry::Done(task.text.clone())
            } else {
                Entry::Open(task.text.clone())
            }
        })
        .collect()
}

/// Notes have no placeholder; an empty note renders as nothing.
pub fn note_entries(notes: &str) -> Vec<Entry> {
    notes
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Entry::Text(line.to_string()))
        .collect()
}

pub fn link_entries(links: &[String]) -> Vec<Entry> {
    if links.is_empty() {
        return vec![Entry::Placeholder(NO_LINKS)];
    }
    links.iter().map(|link| Entry::Text(link.clone())).collect()
}

pub fn appointment_entries(calendar: Option<&Cached<CalendarPayload>>) -> Vec<Entry> {
    let Some(cached) = calendar else {
        return vec![Entry::Placeholder(CALENDAR_OFFLINE)];
    };
    if cached.payload.items.is_empty() {
        return vec![Entry::Placeholder(DAY_IS_OPEN)];
    }
    cached
        .payload
        .items
        .iter()
        .map(|item| Entry::Timed {
            time: item.time.clone(),
            title: item.title.clone(),
        })
        .collect()
}

/// `None` keeps whatever the module showed before.
pub fn weather_text(weather: Option<&Cached<WeatherReport>>, unit: TemperatureUnit) -> Option<String> {
    weather.and_then(|w| w.payload.summary(unit))
}

impl Entry {
    pub fn plain(&self) -> String {
        match self {
            Entry::Open(text) | Entry::Text(text) => text.clone(),
            Entry::Done(text) => format!("{text} (done)"),
            Entry::Timed { time, title } => format!("{time} {title}"),
            Entry::Placeholder(text) => text.to_string(),
        }
    }

    pub fn line(&self, selected: bool) -> Line<'static> {
        let marker = if selected { "› " } else { "  " };
        let marker = Span::styled(marker, Style::default().fg(Color::Cyan));
        match self {
            Entry::Open(text) => Line::from(vec![
                marker,
                Span::styled("○ ", Style::default().fg(Color::DarkGray)),
                Span::styled(text.clone(), Style::default().fg(Color::White)),
            ]),
            Entry::Done(text) => Line::from(vec![
                marker,
                Span::styled("● ", Style::default().fg(Color::Green)),
                Span::styled(
                    text.clone(),
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::CROSSED_OUT),
                ),
            ]),
            Entry::Text(text) => Line::from(vec![marker, Span::raw(text.clone())]),
            Entry::Timed { time, title } => Line::from(vec![
                marker,
                Span::styled(time.clone(), Style::default().fg(Color::LightYellow)),
                Span::raw(" "),
                Span::raw(title.clone()),
            ]),
            Entry::Placeholder(text) => Line::from(vec![
                marker,
                Span::styled(
                    *text,
                    Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
                ),
            ]),
        }
    }
}

pub fn lines(entries: &[Entry], selected: Option<usize>) -> Vec<Line<'static>> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| entry.line(selected == Some(idx)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Appointment;

    #[test]
    fn empty_modules_show_their_placeholders() {
        assert_eq!(task_entries(&[]), vec![Entry::Placeholder(NO_TASKS)]);
        assert_eq!(link_entries(&[]), vec![Entry::Placeholder(NO_LINKS)]);
        assert!(note_entries("").is_empty());
        assert_eq!(
            appointment_entries(Some(&Cached::new(CalendarPayload::default(), 0))),
            vec![Entry::Placeholder(DAY_IS_OPEN)]
        );
    }

    #[test]
    fn tasks_keep_order_and_state() {
        let tasks = vec![
            Task::new("a"),
            Task {
                text: "b".into(),
                completed: true,
            },
        ];
        let entries = task_entries(&tasks);
        assert_eq!(entries, vec![Entry::Open("a".into()), Entry::Done("b".into())]);
        assert_eq!(entries[1].plain(), "b (done)");
    }

    #[test]
    fn rendering_twice_is_identical() {
        let tasks = vec![Task::new("a"), Task::new("b")];
        let first = lines(&task_entries(&tasks), Some(1));
        let second = lines(&task_entries(&tasks), Some(1));
        assert_eq!(first, second);
        assert_eq!(note_entries(" x \n\n y"), note_entries(" x \n\n y"));
    }

    #[test]
    fn appointments_show_time_then_title() {
        let cached = Cached::new(
            CalendarPayload {
                items: vec![Appointment {
                    time: "9:30 AM".into(),
                    title: "Standup".into(),
                }],
            },
            0,
        );
        let entries = appointment_entries(Some(&cached));
        assert_eq!(entries[0].plain(), "9:30 AM Standup");
    }

    #[test]
    fn weather_waits_for_a_snapshot() {
        assert_eq!(weather_text(None, TemperatureUnit::Celsius), None);
        let cached = Cached::new(WeatherReport::new(-3.4, 71), 0);
        assert_eq!(
            weather_text(Some(&cached), TemperatureUnit::Celsius).as_deref(),
            Some("-3°C, Light snow")
        );
    }
}

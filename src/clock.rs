use crate::model::Location;
use chrono::{DateTime, FixedOffset, Local, Timelike, Utc};
use chrono_tz::Tz;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Morning,
    Afternoon,
    Evening,
}

impl Period {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Period::Morning,
            12..=16 => Period::Afternoon,
            _ => Period::Evening,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Morning => "Morning",
            Period::Afternoon => "Afternoon",
            Period::Evening => "Evening",
        }
    }
}

pub fn parse_zone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// Wall-clock time in the saved location's zone, or the machine's zone when
/// there is no usable location.
pub fn local_time(now: DateTime<Utc>, location: Option<&Location>) -> DateTime<FixedOffset> {
    match location.and_then(|l| parse_zone(&l.timezone)) {
        Some(tz) => now.with_timezone(&tz).fixed_offset(),
        None => now.with_timezone(&Local).fixed_offset(),
    }
}

pub fn zone_name(location: Option<&Location>) -> String {
    location
        .and_then(|l| parse_zone(&l.timezone))
        .map(|tz| tz.name().to_string())
        .unwrap_or_else(|| "local".to_string())
}

/// `9:05 AM` style.
pub fn format_time<Z: chrono::TimeZone>(time: &DateTime<Z>) -> String
where
    Z::Offset: std::fmt::Display,
{
    time.format("%-I:%M %p").to_string()
}

pub fn greeting(name: &str, time: &DateTime<FixedOffset>) -> String {
    format!(
        "Good {}, {}. It's {}",
        Period::from_hour(time.hour()).label(),
        name,
        format_time(time)
    )
}

pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = now.second() as u64 * 1000 + (now.timestamp_subsec_millis() as u64).min(999);
    Duration::from_millis(60_000u64.saturating_sub(into_minute))
}

use crate::clock::parse_zone;
use crate::codec;
use crate::config::Config;
use crate::error::LocationError;
use crate::model::{DashboardState, Location};
use crate::signal::Signal;
use crate::storage::KeyValueStore;
use tracing::info;

/// Checks and normalizes a location before it is saved. The zone name is
/// stored in its canonical spelling.
pub fn validate(label: &str, lat: f64, lon: f64, timezone: &str) -> Result<Location, LocationError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(LocationError::EmptyLabel);
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(LocationError::OutOfRange { lat, lon });
    }
    let zone = parse_zone(timezone).ok_or_else(|| LocationError::UnknownZone(timezone.to_string()))?;
    Ok(Location {
        label: label.to_string(),
        lat,
        lon,
        timezone: zone.name().to_string(),
    })
}

/// Replaces the saved location on top of the current stored state.
pub fn set(store: &dyn KeyValueStore, location: Location) -> Result<(DashboardState, Signal), LocationError> {
    let mut state = codec::load(store).state;
    info!(label = %location.label, zone = %location.timezone, "location set");
    state.location = Some(location);
    codec::save(store, &state)?;
    Ok((state, Signal::LocationUpdated))
}

pub fn clear(store: &dyn KeyValueStore) -> Result<(DashboardState, Signal), LocationError> {
    let mut state = codec::load(store).state;
    state.location = None;
    codec::save(store, &state)?;
    info!("location cleared");
    Ok((state, Signal::LocationUpdated))
}

/// The saved location, else the configured default.
pub fn effective<'a>(state: &'a DashboardState, config: &'a Config) -> &'a Location {
    state.location.as_ref().unwrap_or(&config.default_location)
}

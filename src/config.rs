use crate::cache::{CALENDAR_TTL_MS, MINUTE_MS, WEATHER_TTL_MS};
use crate::model::Location;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub temperature_unit: TemperatureUnit,
    pub weather_ttl_minutes: u32,
    pub calendar_ttl_minutes: u32,
    pub default_location: Location,
    pub google: GoogleConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Fahrenheit,
    Celsius,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub recipient: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "friend".into(),
            temperature_unit: TemperatureUnit::Fahrenheit,
            weather_ttl_minutes: (WEATHER_TTL_MS / MINUTE_MS) as u32,
            calendar_ttl_minutes: (CALENDAR_TTL_MS / MINUTE_MS) as u32,
            default_location: Location {
                label: "New Orleans".into(),
                lat: 29.9511,
                lon: -90.0715,
                timezone: "America/Chicago".into(),
            },
            google: GoogleConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl TemperatureUnit {
    pub fn query_value(&self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "fahrenheit",
            TemperatureUnit::Celsius => "celsius",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "°F",
            TemperatureUnit::Celsius => "°C",
        }
    }
}

impl GoogleConfig {
    /// The placeholder id from the sample config counts as unset.
    pub fn is_configured(&self) -> bool {
        let id = self.client_id.trim();
        !id.is_empty() && id != "PASTE_CLIENT_ID_HERE"
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(config = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let data = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let config: Config = serde_yaml::from_str(&data).context("parsing config file")?;
        info!(config = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn weather_ttl_ms(&self) -> i64 {
        i64::from(self.weather_ttl_minutes.max(1)) * MINUTE_MS
    }

    pub fn calendar_ttl_ms(&self) -> i64 {
        i64::from(self.calendar_ttl_minutes.max(1)) * MINUTE_MS
    }
}

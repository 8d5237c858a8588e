use crate::config::TemperatureUnit;
use crate::error::FetchError;
use crate::model::Location;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const FORECAST_ENDPOINT: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: f64,
    pub weathercode: i64,
    pub description: String,
}

pub trait WeatherSource: Send + Sync {
    fn current(&self, location: &Location) -> Result<WeatherReport, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Client,
    unit: TemperatureUnit,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    weathercode: f64,
}

impl OpenMeteoClient {
    pub fn new(unit: TemperatureUnit) -> Self {
        OpenMeteoClient {
            client: Client::new(),
            unit,
        }
    }

    fn forecast_url(&self, location: &Location) -> Result<Url, FetchError> {
        if !location.lat.is_finite() || !location.lon.is_finite() {
            return Err(FetchError::Location(format!(
                "{}: non-finite coordinates",
                location.label
            )));
        }
        Url::parse_with_params(
            FORECAST_ENDPOINT,
            [
                ("latitude", location.lat.to_string()),
                ("longitude", location.lon.to_string()),
                ("current_weather", "true".to_string()),
                ("temperature_unit", self.unit.query_value().to_string()),
            ],
        )
        .map_err(|err| FetchError::Payload(format!("invalid forecast url: {err}")))
    }
}

impl WeatherSource for OpenMeteoClient {
    fn current(&self, location: &Location) -> Result<WeatherReport, FetchError> {
        let url = self.forecast_url(location)?;
        debug!(%url, "fetching weather");
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let payload: ForecastResponse = response.json()?;
        let current = payload
            .current_weather
            .ok_or_else(|| FetchError::Payload("missing current_weather".into()))?;
        Ok(WeatherReport::new(current.temperature, current.weathercode as i64))
    }
}

impl WeatherReport {
    pub fn new(temperature: f64, weathercode: i64) -> Self {
        WeatherReport {
            temperature,
            weathercode,
            description: describe(weathercode).to_string(),
        }
    }

    /// `72°F, Partly cloudy`; `None` when the stored temperature is unusable.
    pub fn summary(&self, unit: TemperatureUnit) -> Option<String> {
        let temp = self.rounded()?;
        let description = if self.description.is_empty() {
            "Clear"
        } else {
            self.description.as_str()
        };
        Some(format!("{}{}, {}", temp, unit.symbol(), description))
    }

    pub fn short(&self, unit: TemperatureUnit) -> Option<String> {
        Some(format!("{}{}", self.rounded()?, unit.symbol()))
    }

    fn rounded(&self) -> Option<i64> {
        if self.temperature.is_finite() {
            Some(self.temperature.round() as i64)
        } else {
            None
        }
    }
}

/// WMO weather interpretation codes as reported by Open-Meteo.
pub fn describe(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Rime fog",
        51 => "Light drizzle",
        53 => "Drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Freezing drizzle",
        61 => "Light rain",
        63 => "Rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Freezing rain",
        71 => "Light snow",
        73 => "Snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Light rain showers",
        81 => "Rain showers",
        82 => "Violent rain showers",
        85 => "Light snow showers",
        86 => "Snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Clear",
    }
}

//! services/chat/src/adapters/weather.rs
//!
//! This module contains the adapter for the open-meteo weather
//! collaborator (forecast + geocoding) and the pure weather-code table.
//! It implements the `WeatherService` port from the `core` crate.

use async_trait::async_trait;
use carechat_core::domain::{Forecast, GeoLocation};
use carechat_core::ports::{PortError, PortResult, WeatherService};
use serde::Deserialize;
use tracing::debug;

const WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";
const GEOCODING_API_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
    name: String,
    #[serde(default)]
    country: String,
}

/// Translates a WMO weather code into a human description.
pub fn interpret_weather_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        95 => "Thunderstorm",
        _ => "Unknown weather condition",
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `WeatherService` port against the
/// open-meteo forecast and geocoding APIs.
#[derive(Clone)]
pub struct OpenMeteoAdapter {
    client: reqwest::Client,
}

impl OpenMeteoAdapter {
    /// Creates a new `OpenMeteoAdapter`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

//=========================================================================================
// `WeatherService` Trait Implementation
//=========================================================================================

#[async_trait]
impl WeatherService for OpenMeteoAdapter {
    async fn forecast(&self, latitude: f64, longitude: f64) -> PortResult<Forecast> {
        let response = self
            .client
            .get(WEATHER_API_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                (
                    "hourly",
                    "temperature_2m,relative_humidity_2m,precipitation_probability,weathercode"
                        .to_string(),
                ),
                (
                    "daily",
                    "weathercode,temperature_2m_max,temperature_2m_min,precipitation_sum"
                        .to_string(),
                ),
                ("timezone", "auto".to_string()),
                ("forecast_days", "7".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let forecast: Forecast = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(latitude, longitude, "fetched forecast");
        Ok(forecast)
    }

    async fn geocode(&self, city: &str) -> PortResult<Option<GeoLocation>> {
        let response = self
            .client
            .get(GEOCODING_API_URL)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let body: GeocodingResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(body.results.into_iter().next().map(|result| GeoLocation {
            latitude: result.latitude,
            longitude: result.longitude,
            name: result.name,
            country: result.country,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_known_and_unknown_codes() {
        assert_eq!(interpret_weather_code(0), "Clear sky");
        assert_eq!(interpret_weather_code(63), "Moderate rain");
        assert_eq!(interpret_weather_code(999), "Unknown weather condition");
    }
}

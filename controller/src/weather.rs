use std::time::Duration;

use chrono::{DateTime, Utc};
use hvac_common::Forecast;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const OPENWEATHERMAP_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("weather service returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    main: MainReadings,
    #[serde(default)]
    wind: Option<Wind>,
    #[serde(default)]
    dt: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: f32,
    humidity: f32,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: f32,
}

#[derive(Clone)]
pub struct WeatherClient {
    base_url: String,
    api_key: String,
    location: String,
    client: Client,
}

impl WeatherClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        location: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            location: location.into(),
            client,
        })
    }

    pub async fn current(&self) -> Result<Forecast, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        debug!(location = %self.location, "fetching current weather");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("APPID", self.api_key.as_str()),
                ("units", "metric"),
                ("q", self.location.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WeatherError::Status(response.status().as_u16()));
        }
        let weather = response.json::<CurrentWeather>().await?;

        Ok(Forecast {
            temperature: weather.main.temp,
            humidity: weather.main.humidity,
            wind_speed: weather.wind.map(|wind| wind.speed).unwrap_or_default(),
            observed_at: weather
                .dt
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Publishes the latest outdoor conditions; the first fetch happens right away.
pub fn spawn_weather_loop(
    client: Option<WeatherClient>,
    interval: Duration,
    sender: watch::Sender<Option<Forecast>>,
) {
    let Some(client) = client else {
        warn!("no weatherMapApiKey configured, outdoor conditions unavailable");
        return;
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match client.current().await {
                Ok(forecast) => {
                    info!(
                        temperature = forecast.temperature,
                        humidity = forecast.humidity,
                        "outdoor conditions updated"
                    );
                    if sender.send(Some(forecast)).is_err() {
                        debug!("forecast receivers gone, stopping weather loop");
                        return;
                    }
                }
                Err(err) => warn!("weather fetch failed: {err}"),
            }
        }
    });
}

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use hvac_common::SensorSample;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sensor returned HTTP {0}")]
    Status(u16),
    #[error("sensor payload rejected: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceResponse {
    temperature: f32,
    #[serde(default)]
    humidity: Option<f32>,
    last_seen: String,
}

/// Polls one device of the remote sensor service.
#[derive(Clone)]
pub struct SensorClient {
    base_url: String,
    device: String,
    client: Client,
}

impl SensorClient {
    pub fn new(
        base_url: impl Into<String>,
        device: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SensorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device: device.into(),
            client,
        })
    }

    pub async fn fetch(&self) -> Result<SensorSample, SensorError> {
        let url = format!("{}/devices/{}", self.base_url, self.device);
        debug!("fetching sensor data from {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SensorError::Status(response.status().as_u16()));
        }
        let device = response.json::<DeviceResponse>().await?;
        sample_from_device(device)
    }
}

fn sample_from_device(device: DeviceResponse) -> Result<SensorSample, SensorError> {
    if !device.temperature.is_finite() || !(-40.0..=85.0).contains(&device.temperature) {
        return Err(SensorError::Invalid(format!(
            "temperature {} out of range",
            device.temperature
        )));
    }
    let humidity = device
        .humidity
        .filter(|humidity| humidity.is_finite() && (0.0..=100.0).contains(humidity));

    Ok(SensorSample {
        date: parse_last_seen(&device.last_seen)?,
        temperature: device.temperature,
        humidity,
    })
}

/// The device reports UTC, usually without an offset suffix.
fn parse_last_seen(raw: &str) -> Result<DateTime<Utc>, SensorError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| SensorError::Invalid(format!("lastSeen '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockito::Server;
    use pretty_assertions::assert_eq;

    use super::*;

    fn client(url: String) -> SensorClient {
        SensorClient::new(url, "living-room", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn reads_device_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/devices/living-room")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"temperature":19.6,"humidity":48.5,"lastSeen":"2026-01-10T06:59:30.000"}"#,
            )
            .create_async()
            .await;

        let sample = client(server.url()).fetch().await.unwrap();

        assert_eq!(
            sample,
            SensorSample {
                date: Utc.with_ymd_and_hms(2026, 1, 10, 6, 59, 30).unwrap(),
                temperature: 19.6,
                humidity: Some(48.5),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/devices/living-room")
            .with_status(503)
            .create_async()
            .await;

        let result = client(server.url()).fetch().await;

        assert!(matches!(result, Err(SensorError::Status(503))));
        mock.assert_async().await;
    }

    #[test]
    fn accepts_offset_timestamps() {
        let parsed = parse_last_seen("2026-01-10T07:59:30+01:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 10, 6, 59, 30).unwrap());
    }

    #[test]
    fn rejects_implausible_temperature() {
        let device = DeviceResponse {
            temperature: 412.0,
            humidity: None,
            last_seen: "2026-01-10T06:59:30".to_string(),
        };

        assert!(matches!(
            sample_from_device(device),
            Err(SensorError::Invalid(_))
        ));
    }

    #[test]
    fn drops_impossible_humidity() {
        let device = DeviceResponse {
            temperature: 20.0,
            humidity: Some(130.0),
            last_seen: "2026-01-10T06:59:30".to_string(),
        };

        assert_eq!(sample_from_device(device).unwrap().humidity, None);
    }
}

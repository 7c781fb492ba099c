use std::time::Duration;

use async_trait::async_trait;
use hvac_common::{RelayCommand, RelayError, SwitchDriver};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StateResponse {
    status: Vec<bool>,
}

/// Relay board reachable over plain HTTP GETs.
pub struct HttpSwitchDriver {
    base_url: String,
    client: Client,
}

impl HttpSwitchDriver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SwitchDriver for HttpSwitchDriver {
    async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        let url = format!("{}/{}/{}", self.base_url, command.pin_index, command.state);
        debug!("relay request {url}");

        let failed = |reason: String| RelayError::Command {
            pin_index: command.pin_index,
            state: command.state,
            reason,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn status(&self) -> Result<Vec<bool>, RelayError> {
        let url = format!("{}/state", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| RelayError::Status(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RelayError::Status(format!("HTTP {}", response.status())));
        }
        let body = response
            .json::<StateResponse>()
            .await
            .map_err(|err| RelayError::Status(err.to_string()))?;
        Ok(body.status)
    }
}

#[cfg(test)]
mod tests {
    use hvac_common::{RelayActuator, RelayBank, RelaySwitch, SwitchState, SwitchType};
    use mockito::Server;
    use pretty_assertions::assert_eq;

    use super::*;

    fn driver(url: String) -> HttpSwitchDriver {
        HttpSwitchDriver::new(url, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn sends_pin_and_state_in_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/2/on")
            .with_status(200)
            .create_async()
            .await;

        driver(server.url())
            .send(RelayCommand {
                pin_index: 2,
                state: SwitchState::On,
            })
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_fails_the_command() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/1/off")
            .with_status(500)
            .create_async()
            .await;

        let result = driver(server.url())
            .send(RelayCommand {
                pin_index: 1,
                state: SwitchState::Off,
            })
            .await;

        assert!(matches!(
            result,
            Err(RelayError::Command { pin_index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn bank_switches_off_then_on_and_resyncs() {
        let mut server = Server::new_async().await;
        let off = server
            .mock("GET", "/1/off")
            .with_status(200)
            .create_async()
            .await;
        let on = server
            .mock("GET", "/2/on")
            .with_status(200)
            .create_async()
            .await;
        let state = server
            .mock("GET", "/state")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":[false,true]}"#)
            .create_async()
            .await;

        let switches = vec![
            RelaySwitch {
                pin_index: 1,
                switch_type: SwitchType::Cool,
                active: true,
            },
            RelaySwitch {
                pin_index: 2,
                switch_type: SwitchType::Heat,
                active: false,
            },
        ];
        let mut bank = RelayBank::new(switches, driver(server.url()));

        let report = bank.activate(SwitchType::Heat).await;

        assert!(report.is_success());
        assert_eq!(report.issued.len(), 2);
        assert_eq!(
            bank.switches().iter().map(|s| s.active).collect::<Vec<_>>(),
            vec![false, true]
        );
        off.assert_async().await;
        on.assert_async().await;
        state.assert_async().await;
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    history::DeltaWindow,
    types::{HeatingCoolingState, RelaySwitch, SwitchType, ThermostatState},
};

/// One week.
pub const MAX_HISTORY_RETENTION_MINUTES: i64 = 7 * 24 * 60;

/// Largest acceptable temperature spread per trailing window, in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaLimits {
    pub quarter: f32,
    pub half_hour: f32,
    pub one_hour: f32,
    pub two_hours: f32,
    pub four_hours: f32,
}

impl DeltaLimits {
    pub fn get(&self, window: DeltaWindow) -> f32 {
        match window {
            DeltaWindow::Quarter => self.quarter,
            DeltaWindow::HalfHour => self.half_hour,
            DeltaWindow::OneHour => self.one_hour,
            DeltaWindow::TwoHours => self.two_hours,
            DeltaWindow::FourHours => self.four_hours,
        }
    }
}

impl Default for DeltaLimits {
    fn default() -> Self {
        Self {
            quarter: 1.1,
            half_hour: 1.7,
            one_hour: 2.2,
            two_hours: 2.8,
            four_hours: 3.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThermostatConfig {
    pub max_temperature_cycle_delta: f32,
    pub delta_max: DeltaLimits,
    pub retry_alert_threshold: u32,
    pub evaluation_interval_secs: u64,
    pub weather_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub history_retention_minutes: i64,
    pub min_target_temperature: f32,
    pub max_target_temperature: f32,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            max_temperature_cycle_delta: 1.1,
            delta_max: DeltaLimits::default(),
            retry_alert_threshold: 5,
            evaluation_interval_secs: 60,
            weather_interval_secs: 300,
            http_timeout_secs: 10,
            history_retention_minutes: 255,
            min_target_temperature: 5.0,
            max_target_temperature: 30.0,
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.max_temperature_cycle_delta.is_finite() || self.max_temperature_cycle_delta <= 0.0
        {
            self.max_temperature_cycle_delta = defaults.max_temperature_cycle_delta;
        }
        self.evaluation_interval_secs = self.evaluation_interval_secs.max(1);
        self.weather_interval_secs = self.weather_interval_secs.max(60);
        self.http_timeout_secs = self.http_timeout_secs.clamp(1, 60);

        // The widest delta window must stay covered.
        let widest = DeltaWindow::FourHours.duration().num_minutes();
        self.history_retention_minutes = self
            .history_retention_minutes
            .clamp(widest, MAX_HISTORY_RETENTION_MINUTES);

        if !(self.min_target_temperature.is_finite()
            && self.max_target_temperature.is_finite()
            && self.min_target_temperature < self.max_target_temperature)
        {
            self.min_target_temperature = defaults.min_target_temperature;
            self.max_target_temperature = defaults.max_target_temperature;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayBoardConfig {
    pub hostname: String,
    #[serde(default)]
    pub secure: bool,
    pub switches: Vec<RelaySwitch>,
}

impl RelayBoardConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.hostname)
    }
}

impl Default for RelayBoardConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            secure: false,
            switches: vec![
                RelaySwitch {
                    pin_index: 1,
                    switch_type: SwitchType::Cool,
                    active: false,
                },
                RelaySwitch {
                    pin_index: 2,
                    switch_type: SwitchType::Heat,
                    active: false,
                },
            ],
        }
    }
}

/// The JSON document persisted after every evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub version: u32,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub weather_map_api_key: String,
    #[serde(default = "default_weather_location")]
    pub weather_location: String,
    #[serde(default)]
    pub temperature_sensor: String,
    #[serde(default = "default_sensor_base_url")]
    pub sensor_base_url: String,
    #[serde(rename = "relais")]
    pub relay_board: RelayBoardConfig,
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    pub thermostat_state: ThermostatState,
}

fn default_weather_location() -> String {
    "Hasselt,be".to_string()
}

fn default_sensor_base_url() -> String {
    "http://napi.jamievangeysel.be/v1/neo".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: 2,
            hostname: "0.0.0.0".to_string(),
            port: 8080,
            weather_map_api_key: String::new(),
            weather_location: default_weather_location(),
            temperature_sensor: String::new(),
            sensor_base_url: default_sensor_base_url(),
            relay_board: RelayBoardConfig::default(),
            thermostat: ThermostatConfig::default(),
            thermostat_state: ThermostatState::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        self.thermostat_state.sanitize(&self.thermostat);
        self.relay_board.switches.retain(|switch| switch.pin_index >= 1);
    }
}

impl ThermostatState {
    pub fn sanitize(&mut self, config: &ThermostatConfig) {
        if self.current_heating_cooling_state == HeatingCoolingState::Auto {
            self.current_heating_cooling_state = HeatingCoolingState::Off;
        }

        if !self.target_temperature.is_finite() {
            self.target_temperature = ThermostatState::default().target_temperature;
        }
        self.target_temperature = self
            .target_temperature
            .clamp(config.min_target_temperature, config.max_target_temperature);

        if self
            .current_relative_humidity
            .is_some_and(|humidity| !humidity.is_finite())
        {
            self.current_relative_humidity = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn loads_legacy_document_with_numeric_modes() {
        let raw = r#"{
            "version": 2,
            "hostname": "localhost",
            "port": 8080,
            "weatherMapApiKey": "",
            "temperatureSensor": "abc",
            "relais": {
                "hostname": "relay.local",
                "secure": false,
                "switches": [
                    { "pinIndex": 1, "type": "COOL", "active": false },
                    { "pinIndex": 2, "type": "HEAT", "active": true }
                ]
            },
            "thermostatState": {
                "currentTemperature": 19.5,
                "targetTemperature": 20,
                "currentRelativeHumidity": 50,
                "currentHeatingCoolingState": 1,
                "targetHeatingCoolingState": 1,
                "temperatureDisplayUnits": "CELSIUS"
            }
        }"#;

        let config: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.temperature_sensor, "abc");
        assert_eq!(config.relay_board.base_url(), "http://relay.local");
        assert_eq!(config.relay_board.switches.len(), 2);
        assert_eq!(
            config.thermostat_state.target_heating_cooling_state,
            HeatingCoolingState::Heat
        );
        assert_eq!(config.thermostat.max_temperature_cycle_delta, 1.1);
        assert_eq!(config.weather_location, "Hasselt,be");
    }

    #[test]
    fn sanitize_resolves_auto_current_state() {
        let mut config = RuntimeConfig::default();
        config.thermostat_state.current_heating_cooling_state = HeatingCoolingState::Auto;
        config.thermostat_state.target_temperature = f32::NAN;

        config.sanitize();

        assert_eq!(
            config.thermostat_state.current_heating_cooling_state,
            HeatingCoolingState::Off
        );
        assert_eq!(config.thermostat_state.target_temperature, 20.0);
    }

    #[test]
    fn sanitize_clamps_target_and_retention() {
        let mut config = RuntimeConfig::default();
        config.thermostat_state.target_temperature = 45.0;
        config.thermostat.history_retention_minutes = 30;
        config.thermostat.max_temperature_cycle_delta = -1.0;

        config.sanitize();

        assert_eq!(config.thermostat_state.target_temperature, 30.0);
        assert_eq!(config.thermostat.history_retention_minutes, 240);
        assert_eq!(config.thermostat.max_temperature_cycle_delta, 1.1);
    }

    #[test]
    fn oversized_retention_is_capped_at_one_week() {
        let mut config = RuntimeConfig::default();
        config.thermostat.history_retention_minutes = i64::MAX;

        config.sanitize();

        assert_eq!(config.thermostat.history_retention_minutes, 10_080);
    }

    #[test]
    fn default_document_round_trips() {
        let config = RuntimeConfig::default();
        let raw = serde_json::to_string_pretty(&config).unwrap();
        let restored: RuntimeConfig = serde_json::from_str(&raw).unwrap();

        assert_eq!(restored.relay_board.switches, config.relay_board.switches);
        assert_eq!(restored.thermostat_state, config.thermostat_state);
    }
}

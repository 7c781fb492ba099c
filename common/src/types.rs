use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    history::{TemperatureDeltaSnapshot, TemperatureHistoryEntry},
    thresholds::Thresholds,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "HeatingCoolingStateRepr")]
pub enum HeatingCoolingState {
    #[default]
    Off,
    Heat,
    Cool,
    Auto,
}

impl HeatingCoolingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Auto => "AUTO",
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heat => 1,
            Self::Cool => 2,
            Self::Auto => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            3 => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for HeatingCoolingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeatingCoolingState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OFF" | "0" => Ok(Self::Off),
            "HEAT" | "1" => Ok(Self::Heat),
            "COOL" | "2" => Ok(Self::Cool),
            "AUTO" | "3" => Ok(Self::Auto),
            other => Err(format!("unknown heating/cooling state '{other}'")),
        }
    }
}

// Older config documents store the mode as its numeric index.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeatingCoolingStateRepr {
    Index(u8),
    Name(String),
}

impl TryFrom<HeatingCoolingStateRepr> for HeatingCoolingState {
    type Error = String;

    fn try_from(repr: HeatingCoolingStateRepr) -> Result<Self, Self::Error> {
        match repr {
            HeatingCoolingStateRepr::Index(index) => Self::from_index(index)
                .ok_or_else(|| format!("heating/cooling state index {index} out of range")),
            HeatingCoolingStateRepr::Name(name) => name.parse(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureDisplayUnits {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchType {
    Heat,
    Cool,
    Vent,
    /// Selects no switch; activating it turns every switch off.
    None,
}

impl SwitchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Vent => "VENT",
            Self::None => "NONE",
        }
    }

    /// Whether `switch` belongs to the group switched on by activating `self`.
    pub fn selects(self, switch: &RelaySwitch) -> bool {
        self != Self::None && switch.switch_type == self
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySwitch {
    pub pin_index: u8,
    #[serde(rename = "type")]
    pub switch_type: SwitchType,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermostatState {
    pub current_temperature: f32,
    #[serde(default)]
    pub current_relative_humidity: Option<f32>,
    pub target_temperature: f32,
    pub current_heating_cooling_state: HeatingCoolingState,
    pub target_heating_cooling_state: HeatingCoolingState,
    #[serde(default)]
    pub temperature_display_units: TemperatureDisplayUnits,
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self {
            current_temperature: 0.0,
            current_relative_humidity: None,
            target_temperature: 20.0,
            current_heating_cooling_state: HeatingCoolingState::Off,
            target_heating_cooling_state: HeatingCoolingState::Off,
            temperature_display_units: TemperatureDisplayUnits::Celsius,
        }
    }
}

/// One reading from the remote sensor device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub date: DateTime<Utc>,
    pub temperature: f32,
    pub humidity: Option<f32>,
}

/// Latest outdoor conditions reported by the weather service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub temperature: f32,
    pub humidity: f32,
    pub wind_speed: f32,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComfortMetrics {
    pub indoor_heat_index: Option<f32>,
    pub outside_temperature: Option<f32>,
    pub outside_heat_index: Option<f32>,
    pub outside_wind_chill: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub state: ThermostatState,
    pub thresholds: Thresholds,
    pub deltas: TemperatureDeltaSnapshot,
    pub switches: Vec<RelaySwitch>,
    pub retries: u32,
    pub alert: bool,
    pub comfort: ComfortMetrics,
    pub history_len: usize,
    pub last_sample: Option<TemperatureHistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_accepts_names_and_indices() {
        let by_name: HeatingCoolingState = serde_json::from_str("\"COOL\"").unwrap();
        let by_index: HeatingCoolingState = serde_json::from_str("1").unwrap();
        let lower: HeatingCoolingState = serde_json::from_str("\"auto\"").unwrap();

        assert_eq!(by_name, HeatingCoolingState::Cool);
        assert_eq!(by_index, HeatingCoolingState::Heat);
        assert_eq!(lower, HeatingCoolingState::Auto);
        assert!(serde_json::from_str::<HeatingCoolingState>("7").is_err());
        assert!(serde_json::from_str::<HeatingCoolingState>("\"FAN\"").is_err());
    }

    #[test]
    fn mode_serializes_as_name() {
        let json = serde_json::to_string(&HeatingCoolingState::Heat).unwrap();
        assert_eq!(json, "\"HEAT\"");
    }

    #[test]
    fn none_switch_type_selects_nothing() {
        let switch = RelaySwitch {
            pin_index: 3,
            switch_type: SwitchType::None,
            active: false,
        };

        assert!(!SwitchType::None.selects(&switch));
        assert!(!SwitchType::Heat.selects(&switch));
    }

    #[test]
    fn relay_switch_uses_wire_field_names() {
        let switch: RelaySwitch =
            serde_json::from_str(r#"{"pinIndex":2,"type":"HEAT","active":true}"#).unwrap();

        assert_eq!(switch.pin_index, 2);
        assert_eq!(switch.switch_type, SwitchType::Heat);
        assert!(switch.active);
    }
}

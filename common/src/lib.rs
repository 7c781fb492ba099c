pub mod comfort;
pub mod config;
pub mod history;
pub mod relay;
pub mod thermostat;
pub mod thresholds;
pub mod types;

pub use config::{DeltaLimits, RelayBoardConfig, RuntimeConfig, ThermostatConfig};
pub use history::{
    DeltaWindow, TemperatureDeltaSnapshot, TemperatureHistory, TemperatureHistoryEntry,
    WindowDelta,
};
pub use relay::{
    plan_activation, ActivationReport, RelayActuator, RelayBank, RelayCommand, RelayError,
    RelayFailure, SwitchDriver,
};
pub use thermostat::{Change, EvaluationOutcome, ThermostatEngine, ValidationError};
pub use thresholds::{ThresholdCalculator, Thresholds};
pub use types::{
    ComfortMetrics, ControllerStatus, Forecast, HeatingCoolingState, RelaySwitch, SensorSample,
    SwitchState, SwitchType, TemperatureDisplayUnits, ThermostatState,
};

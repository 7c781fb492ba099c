use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    comfort,
    config::{ThermostatConfig, MAX_HISTORY_RETENTION_MINUTES},
    history::{DeltaWindow, TemperatureDeltaSnapshot, TemperatureHistory, TemperatureHistoryEntry},
    relay::{ActivationReport, RelayActuator},
    thresholds::{ThresholdCalculator, Thresholds},
    types::{
        ComfortMetrics, ControllerStatus, Forecast, HeatingCoolingState, RelaySwitch,
        SensorSample, SwitchType, ThermostatState,
    },
};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("target temperature must be a finite number")]
    NotFinite,
    #[error("target temperature {value} is outside {min}..={max}")]
    OutOfRange { value: f32, min: f32, max: f32 },
}

/// Previous and new value of a setter, as echoed back to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Change<T> {
    pub previous: T,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub previous: HeatingCoolingState,
    pub current: HeatingCoolingState,
    pub transitioned: bool,
    pub relay_failures: usize,
    pub retries: u32,
    pub alert: bool,
    pub exceeded: Vec<DeltaWindow>,
    pub thresholds: Thresholds,
}

#[derive(Debug, Default)]
struct Cycle {
    failures: usize,
    transitioned: bool,
}

impl Cycle {
    /// Returns whether every command in `report` succeeded.
    fn absorb(&mut self, report: &ActivationReport) -> bool {
        self.failures += report.failures.len();
        report.is_success()
    }
}

#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    pub config: ThermostatConfig,
    state: ThermostatState,
    history: TemperatureHistory,
    forecast: Option<Forecast>,
    calculator: ThresholdCalculator,
    retries: u32,
    has_reading: bool,
}

fn retention(minutes: i64) -> Duration {
    Duration::try_minutes(minutes.min(MAX_HISTORY_RETENTION_MINUTES))
        .unwrap_or_else(|| Duration::minutes(MAX_HISTORY_RETENTION_MINUTES))
}

impl ThermostatEngine {
    pub fn new(mut config: ThermostatConfig, mut state: ThermostatState) -> Self {
        config.sanitize();
        state.sanitize(&config);
        Self {
            history: TemperatureHistory::new(retention(config.history_retention_minutes)),
            calculator: ThresholdCalculator::from_config(&config),
            config,
            state,
            forecast: None,
            retries: 0,
            has_reading: false,
        }
    }

    pub fn state(&self) -> &ThermostatState {
        &self.state
    }

    pub fn history(&self) -> &TemperatureHistory {
        &self.history
    }

    pub fn forecast(&self) -> Option<&Forecast> {
        self.forecast.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether a sensor sample has been recorded since the engine was built.
    pub fn has_reading(&self) -> bool {
        self.has_reading
    }

    pub fn is_alerting(&self) -> bool {
        self.retries > self.config.retry_alert_threshold
    }

    /// Stores the reading as the current temperature. Returns `false` when the
    /// sample repeats the last history timestamp and was left out of history.
    pub fn record_sample(&mut self, sample: SensorSample) -> bool {
        self.state.current_temperature = sample.temperature;
        self.has_reading = true;
        if let Some(humidity) = sample.humidity {
            self.state.current_relative_humidity = Some(humidity);
        }

        let appended = self.history.append(TemperatureHistoryEntry {
            date: sample.date,
            temperature: sample.temperature,
        });
        if appended {
            debug!(date = %sample.date, temperature = sample.temperature, "sample added to history");
        } else {
            warn!(date = %sample.date, "sensor returned stale data, skipping history insert");
        }
        appended
    }

    pub fn update_forecast(&mut self, forecast: Option<Forecast>) {
        self.forecast = forecast;
    }

    pub fn thresholds(&self) -> Thresholds {
        self.calculator.compute(
            self.state.target_temperature,
            self.state.current_temperature,
            &self.history,
            self.forecast.as_ref(),
        )
    }

    pub fn deltas(&self, now: DateTime<Utc>) -> TemperatureDeltaSnapshot {
        self.history.deltas(now)
    }

    pub fn comfort(&self) -> ComfortMetrics {
        ComfortMetrics {
            indoor_heat_index: self
                .state
                .current_relative_humidity
                .map(|humidity| comfort::heat_index(self.state.current_temperature, humidity)),
            outside_temperature: self.forecast.map(|forecast| forecast.temperature),
            outside_heat_index: self
                .forecast
                .map(|forecast| comfort::heat_index(forecast.temperature, forecast.humidity)),
            outside_wind_chill: self
                .forecast
                .map(|forecast| comfort::wind_chill(forecast.temperature, forecast.wind_speed)),
        }
    }

    pub fn validate_target_temperature(&self, value: f32) -> Result<f32, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite);
        }
        let (min, max) = (
            self.config.min_target_temperature,
            self.config.max_target_temperature,
        );
        if !(min..=max).contains(&value) {
            return Err(ValidationError::OutOfRange { value, min, max });
        }
        Ok(value)
    }

    pub async fn set_target_temperature_and_evaluate<R>(
        &mut self,
        value: f32,
        relays: &mut R,
        now: DateTime<Utc>,
    ) -> Result<(Change<f32>, EvaluationOutcome), ValidationError>
    where
        R: RelayActuator + ?Sized,
    {
        let value = self.validate_target_temperature(value)?;
        let previous = self.state.target_temperature;
        self.state.target_temperature = value;
        info!(previous, value, "target temperature changed");

        let outcome = self.evaluate(relays, now).await;
        Ok((Change { previous, value }, outcome))
    }

    pub async fn set_target_state_and_evaluate<R>(
        &mut self,
        mode: HeatingCoolingState,
        relays: &mut R,
        now: DateTime<Utc>,
    ) -> (Change<HeatingCoolingState>, EvaluationOutcome)
    where
        R: RelayActuator + ?Sized,
    {
        let previous = self.state.target_heating_cooling_state;
        self.state.target_heating_cooling_state = mode;
        info!(%previous, value = %mode, "target heating/cooling state changed");

        let outcome = self.evaluate(relays, now).await;
        (
            Change {
                previous,
                value: mode,
            },
            outcome,
        )
    }

    /// One pass of the control loop. Callers must not run two evaluations at
    /// once against the same engine and relay set.
    pub async fn evaluate<R>(&mut self, relays: &mut R, now: DateTime<Utc>) -> EvaluationOutcome
    where
        R: RelayActuator + ?Sized,
    {
        let thresholds = self.thresholds();
        let deltas = self.history.deltas(now);
        let exceeded = thresholds.exceeded_windows(&deltas);
        for window in &exceeded {
            if let Some(observed) = deltas.get(*window) {
                warn!(
                    window = window.as_str(),
                    delta = observed.delta,
                    limit = thresholds.delta_max.get(*window),
                    "temperature spread above limit"
                );
            }
        }

        let previous = self.state.current_heating_cooling_state;
        let temperature = self.state.current_temperature;
        let mut cycle = Cycle::default();
        debug!(
            target = %self.state.target_heating_cooling_state,
            current = %previous,
            temperature,
            heating_min = thresholds.heating_min,
            heating_max = thresholds.heating_max,
            "evaluating"
        );

        match self.state.target_heating_cooling_state {
            HeatingCoolingState::Off => {
                let report = relays.activate(SwitchType::None).await;
                self.state.current_heating_cooling_state = HeatingCoolingState::Off;
                if cycle.absorb(&report) {
                    cycle.transitioned = true;
                }
            }
            HeatingCoolingState::Heat | HeatingCoolingState::Cool if !self.has_reading => {
                warn!(
                    mode = %self.state.target_heating_cooling_state,
                    "no sensor reading yet, leaving relays untouched"
                );
            }
            HeatingCoolingState::Heat => {
                self.evaluate_heat(relays, &thresholds, temperature, &mut cycle)
                    .await
            }
            HeatingCoolingState::Cool => {
                self.evaluate_cool(relays, &thresholds, temperature, &mut cycle)
                    .await
            }
            HeatingCoolingState::Auto => {
                warn!("AUTO mode is not supported yet, leaving relays untouched");
            }
        }

        if cycle.failures > 0 {
            self.retries = self.retries.saturating_add(1);
            warn!(
                failures = cycle.failures,
                retries = self.retries,
                "relay activation failed, will retry next cycle"
            );
        } else if cycle.transitioned {
            self.retries = 0;
        }

        let alert = self.is_alerting();
        if alert {
            error!(
                retries = self.retries,
                "relays keep failing; power off the heating/cooling installation manually"
            );
        }

        let current = self.state.current_heating_cooling_state;
        if current != previous {
            info!(%previous, %current, temperature, "heating/cooling state changed");
        }

        EvaluationOutcome {
            previous,
            current,
            transitioned: cycle.transitioned,
            relay_failures: cycle.failures,
            retries: self.retries,
            alert,
            exceeded,
            thresholds,
        }
    }

    async fn evaluate_heat<R>(
        &mut self,
        relays: &mut R,
        thresholds: &Thresholds,
        temperature: f32,
        cycle: &mut Cycle,
    ) where
        R: RelayActuator + ?Sized,
    {
        if relays.any_active(SwitchType::Cool) {
            let report = relays.activate(SwitchType::None).await;
            if !cycle.absorb(&report) {
                return;
            }
        }
        if self.state.current_heating_cooling_state == HeatingCoolingState::Cool {
            self.state.current_heating_cooling_state = HeatingCoolingState::Off;
        }

        match self.state.current_heating_cooling_state {
            HeatingCoolingState::Heat if temperature >= thresholds.heating_max => {
                self.attempt(relays, SwitchType::None, HeatingCoolingState::Off, cycle)
                    .await;
            }
            HeatingCoolingState::Heat => {
                if relays.any_inactive(SwitchType::Heat) {
                    cycle.absorb(&relays.activate(SwitchType::Heat).await);
                }
            }
            HeatingCoolingState::Off if temperature <= thresholds.heating_min => {
                self.attempt(relays, SwitchType::Heat, HeatingCoolingState::Heat, cycle)
                    .await;
            }
            HeatingCoolingState::Off => {
                if relays.any_active(SwitchType::Heat) {
                    cycle.absorb(&relays.activate(SwitchType::None).await);
                }
            }
            HeatingCoolingState::Cool | HeatingCoolingState::Auto => {}
        }
    }

    async fn evaluate_cool<R>(
        &mut self,
        relays: &mut R,
        thresholds: &Thresholds,
        temperature: f32,
        cycle: &mut Cycle,
    ) where
        R: RelayActuator + ?Sized,
    {
        // A running cooler is only cleared when something else is on alongside
        // it. Clearing it every cycle would switch the compressor off and
        // straight back on.
        let clear = self.state.current_heating_cooling_state != HeatingCoolingState::Cool
            || relays.any_active_except(SwitchType::Cool);
        if clear {
            let report = relays.activate(SwitchType::None).await;
            if !cycle.absorb(&report) {
                return;
            }
        }
        if self.state.current_heating_cooling_state == HeatingCoolingState::Heat {
            self.state.current_heating_cooling_state = HeatingCoolingState::Off;
        }

        match self.state.current_heating_cooling_state {
            HeatingCoolingState::Cool if temperature <= thresholds.cooling_min => {
                self.attempt(relays, SwitchType::None, HeatingCoolingState::Off, cycle)
                    .await;
            }
            HeatingCoolingState::Cool => {
                if relays.any_inactive(SwitchType::Cool) {
                    cycle.absorb(&relays.activate(SwitchType::Cool).await);
                }
            }
            HeatingCoolingState::Off if temperature >= thresholds.cooling_max => {
                self.attempt(relays, SwitchType::Cool, HeatingCoolingState::Cool, cycle)
                    .await;
            }
            HeatingCoolingState::Off | HeatingCoolingState::Heat | HeatingCoolingState::Auto => {}
        }
    }

    /// Switches relays toward `next` and only commits the state when every
    /// command went through.
    async fn attempt<R>(
        &mut self,
        relays: &mut R,
        switch_type: SwitchType,
        next: HeatingCoolingState,
        cycle: &mut Cycle,
    ) where
        R: RelayActuator + ?Sized,
    {
        let report = relays.activate(switch_type).await;
        if cycle.absorb(&report) {
            self.state.current_heating_cooling_state = next;
            cycle.transitioned = true;
        }
    }

    pub fn status(&self, switches: &[RelaySwitch], now: DateTime<Utc>) -> ControllerStatus {
        ControllerStatus {
            state: self.state.clone(),
            thresholds: self.thresholds(),
            deltas: self.deltas(now),
            switches: switches.to_vec(),
            retries: self.retries,
            alert: self.is_alerting(),
            comfort: self.comfort(),
            history_len: self.history.len(),
            last_sample: self.history.last().copied(),
        }
    }
}

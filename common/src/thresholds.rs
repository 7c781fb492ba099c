use serde::Serialize;
use tracing::debug;

use crate::{
    comfort,
    config::{DeltaLimits, ThermostatConfig},
    history::{DeltaWindow, TemperatureDeltaSnapshot, TemperatureHistory},
    types::Forecast,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub heating_min: f32,
    pub heating_max: f32,
    pub cooling_min: f32,
    pub cooling_max: f32,
    pub delta_max: DeltaLimits,
    /// Reported for observability only; not applied to the bounds.
    pub operative_temperature: Option<f32>,
}

impl Thresholds {
    /// Windows whose observed spread is above its limit. Empty windows never
    /// count as exceeded.
    pub fn exceeded_windows(&self, deltas: &TemperatureDeltaSnapshot) -> Vec<DeltaWindow> {
        DeltaWindow::NESTED
            .into_iter()
            .filter(|window| {
                deltas
                    .get(*window)
                    .is_some_and(|observed| observed.delta > self.delta_max.get(*window))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdCalculator {
    max_cycle_delta: f32,
    delta_max: DeltaLimits,
}

impl ThresholdCalculator {
    pub fn new(max_cycle_delta: f32, delta_max: DeltaLimits) -> Self {
        Self {
            max_cycle_delta,
            delta_max,
        }
    }

    pub fn from_config(config: &ThermostatConfig) -> Self {
        Self::new(config.max_temperature_cycle_delta, config.delta_max)
    }

    pub fn compute(
        &self,
        target: f32,
        current: f32,
        history: &TemperatureHistory,
        forecast: Option<&Forecast>,
    ) -> Thresholds {
        let half_band = self.max_cycle_delta / 2.0;
        let mut thresholds = Thresholds {
            heating_min: target - half_band,
            heating_max: target + half_band,
            cooling_min: target - half_band,
            cooling_max: target + half_band,
            delta_max: self.delta_max,
            operative_temperature: None,
        };

        // Cold start: without history, a reading already below the band
        // becomes the bottom of the heating band.
        if history.is_empty() && current < thresholds.heating_min {
            thresholds.heating_min = current;
            thresholds.heating_max = current + self.max_cycle_delta;
        }

        if forecast.is_some() {
            // No radiant probe: the air reading stands in for mean radiant temperature.
            let air_speed = comfort::desired_air_speed(current);
            let operative = comfort::operative_temperature(current, current, air_speed);
            debug!(
                air_speed,
                operative, "forecast available, computed operative temperature"
            );
            thresholds.operative_temperature = Some(operative);
        }

        thresholds
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::history::TemperatureHistoryEntry;

    fn calculator() -> ThresholdCalculator {
        ThresholdCalculator::from_config(&ThermostatConfig::default())
    }

    fn seeded_history() -> TemperatureHistory {
        let mut history = TemperatureHistory::new(Duration::minutes(255));
        history.append(TemperatureHistoryEntry {
            date: Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap(),
            temperature: 19.0,
        });
        history
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn symmetric_band_around_target() {
        let thresholds = calculator().compute(20.0, 20.0, &seeded_history(), None);

        assert!(close(thresholds.heating_min, 19.45));
        assert!(close(thresholds.heating_max, 20.55));
        assert!(close(thresholds.cooling_min, 19.45));
        assert!(close(thresholds.cooling_max, 20.55));
        assert_eq!(thresholds.operative_temperature, None);
    }

    #[test]
    fn cold_start_shifts_heating_band_down() {
        let empty = TemperatureHistory::new(Duration::minutes(255));
        let thresholds = calculator().compute(20.0, 17.0, &empty, None);

        assert!(close(thresholds.heating_min, 17.0));
        assert!(close(thresholds.heating_max, 18.1));
        assert!(close(thresholds.cooling_max, 20.55));
    }

    #[test]
    fn cold_start_inside_band_keeps_defaults() {
        let empty = TemperatureHistory::new(Duration::minutes(255));
        let thresholds = calculator().compute(20.0, 19.8, &empty, None);

        assert!(close(thresholds.heating_min, 19.45));
    }

    #[test]
    fn forecast_only_adds_operative_temperature() {
        let forecast = Forecast {
            temperature: 4.0,
            humidity: 80.0,
            wind_speed: 3.0,
            observed_at: Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap(),
        };
        let with = calculator().compute(20.0, 20.0, &seeded_history(), Some(&forecast));
        let without = calculator().compute(20.0, 20.0, &seeded_history(), None);

        assert!(with.operative_temperature.is_some());
        assert_eq!(with.heating_min, without.heating_min);
        assert_eq!(with.cooling_max, without.cooling_max);
    }

    #[test]
    fn reports_exceeded_windows_only_with_data() {
        let thresholds = calculator().compute(20.0, 20.0, &seeded_history(), None);
        let deltas = TemperatureDeltaSnapshot {
            quarter: Some(crate::history::WindowDelta {
                min: 19.0,
                max: 20.5,
                delta: 1.5,
            }),
            four_hours: Some(crate::history::WindowDelta {
                min: 19.0,
                max: 20.5,
                delta: 1.5,
            }),
            ..Default::default()
        };

        assert_eq!(
            thresholds.exceeded_windows(&deltas),
            vec![DeltaWindow::Quarter]
        );
    }
}

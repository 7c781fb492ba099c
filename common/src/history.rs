use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeltaWindow {
    Quarter,
    HalfHour,
    OneHour,
    TwoHours,
    FourHours,
}

impl DeltaWindow {
    /// Widest first; each window is filtered from the one before it.
    pub const NESTED: [DeltaWindow; 5] = [
        Self::FourHours,
        Self::TwoHours,
        Self::OneHour,
        Self::HalfHour,
        Self::Quarter,
    ];

    pub fn duration(self) -> Duration {
        match self {
            Self::Quarter => Duration::minutes(15),
            Self::HalfHour => Duration::minutes(30),
            Self::OneHour => Duration::hours(1),
            Self::TwoHours => Duration::hours(2),
            Self::FourHours => Duration::hours(4),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quarter => "quarter",
            Self::HalfHour => "halfHour",
            Self::OneHour => "oneHour",
            Self::TwoHours => "twoHours",
            Self::FourHours => "fourHours",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureHistoryEntry {
    pub date: DateTime<Utc>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowDelta {
    pub min: f32,
    pub max: f32,
    pub delta: f32,
}

impl WindowDelta {
    /// `None` when the window holds no samples.
    fn from_temperatures(temperatures: impl Iterator<Item = f32>) -> Option<Self> {
        let (min, max) = temperatures.fold(None, |acc: Option<(f32, f32)>, t| match acc {
            Some((min, max)) => Some((min.min(t), max.max(t))),
            None => Some((t, t)),
        })?;
        Some(Self {
            min,
            max,
            delta: max - min,
        })
    }
}

/// Spread of recent temperatures per trailing window. A window without samples
/// is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureDeltaSnapshot {
    pub quarter: Option<WindowDelta>,
    pub half_hour: Option<WindowDelta>,
    pub one_hour: Option<WindowDelta>,
    pub two_hours: Option<WindowDelta>,
    pub four_hours: Option<WindowDelta>,
}

impl TemperatureDeltaSnapshot {
    pub fn get(&self, window: DeltaWindow) -> Option<WindowDelta> {
        match window {
            DeltaWindow::Quarter => self.quarter,
            DeltaWindow::HalfHour => self.half_hour,
            DeltaWindow::OneHour => self.one_hour,
            DeltaWindow::TwoHours => self.two_hours,
            DeltaWindow::FourHours => self.four_hours,
        }
    }

    fn set(&mut self, window: DeltaWindow, value: Option<WindowDelta>) {
        let slot = match window {
            DeltaWindow::Quarter => &mut self.quarter,
            DeltaWindow::HalfHour => &mut self.half_hour,
            DeltaWindow::OneHour => &mut self.one_hour,
            DeltaWindow::TwoHours => &mut self.two_hours,
            DeltaWindow::FourHours => &mut self.four_hours,
        };
        *slot = value;
    }
}

/// Arrival-ordered temperature samples, pruned to a retention horizon measured
/// back from the newest sample.
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    entries: VecDeque<TemperatureHistoryEntry>,
    retention: Duration,
}

impl TemperatureHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TemperatureHistoryEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TemperatureHistoryEntry> {
        self.entries.iter()
    }

    /// Returns `false` and stores nothing when `entry` repeats the date of the
    /// last stored sample.
    pub fn append(&mut self, entry: TemperatureHistoryEntry) -> bool {
        if self
            .entries
            .back()
            .is_some_and(|last| last.date == entry.date)
        {
            return false;
        }

        self.entries.push_back(entry);
        self.prune(entry.date);
        true
    }

    pub fn deltas(&self, now: DateTime<Utc>) -> TemperatureDeltaSnapshot {
        let mut snapshot = TemperatureDeltaSnapshot::default();
        let mut window: Vec<&TemperatureHistoryEntry> = self.entries.iter().collect();

        for span in DeltaWindow::NESTED {
            let cutoff = now - span.duration();
            window.retain(|entry| entry.date >= cutoff);
            snapshot.set(
                span,
                WindowDelta::from_temperatures(window.iter().map(|entry| entry.temperature)),
            );
        }

        snapshot
    }

    fn prune(&mut self, newest: DateTime<Utc>) {
        let cutoff = newest - self.retention;
        while self
            .entries
            .front()
            .is_some_and(|oldest| oldest.date < cutoff)
        {
            self.entries.pop_front();
        }
    }
}

use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use hvac_common::{HeatingCoolingState, ThermostatState};
use serde::Serialize;
use tokio::{io::AsyncWriteExt, sync::Mutex};

#[derive(Debug, Clone, Serialize)]
pub struct DataLogRow {
    pub date: String,
    pub state: HeatingCoolingState,
    #[serde(rename = "target-state")]
    pub target_state: HeatingCoolingState,
    pub temperature: f32,
    #[serde(rename = "target-temperature")]
    pub target_temperature: f32,
    #[serde(rename = "outside-temperature")]
    pub outside_temperature: Option<f32>,
    #[serde(rename = "heat-index")]
    pub heat_index: Option<f32>,
}

impl DataLogRow {
    pub fn new(
        now: DateTime<Utc>,
        state: &ThermostatState,
        outside_temperature: Option<f32>,
        heat_index: Option<f32>,
    ) -> Self {
        Self {
            date: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            state: state.current_heating_cooling_state,
            target_state: state.target_heating_cooling_state,
            temperature: state.current_temperature,
            target_temperature: state.target_temperature,
            outside_temperature,
            heat_index,
        }
    }
}

/// Append-only CSV record of every evaluation cycle.
#[derive(Clone)]
pub struct DataLog {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl DataLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append(&self, row: &DataLogRow) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;

        let is_new = match tokio::fs::metadata(self.path.as_ref()).await {
            Ok(metadata) => metadata.len() == 0,
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => return Err(err.into()),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(Vec::new());
        writer.serialize(row)?;
        let payload = writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("csv flush failed: {}", err.error()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_ref())
            .await?;
        file.write_all(&payload).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn writes_header_once_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data-log.csv");
        let log = DataLog::new(path.clone());
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 7, 0, 5).unwrap();
        let state = ThermostatState {
            current_temperature: 19.5,
            target_temperature: 20.0,
            current_heating_cooling_state: HeatingCoolingState::Heat,
            target_heating_cooling_state: HeatingCoolingState::Heat,
            ..ThermostatState::default()
        };

        log.append(&DataLogRow::new(now, &state, Some(4.5), None))
            .await
            .unwrap();
        log.append(&DataLogRow::new(now, &state, None, Some(19.1)))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "date,state,target-state,temperature,target-temperature,outside-temperature,heat-index\n\
             2026-01-10 07:00:05,HEAT,HEAT,19.5,20.0,4.5,\n\
             2026-01-10 07:00:05,HEAT,HEAT,19.5,20.0,,19.1\n"
        );
    }
}

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
    time::MissedTickBehavior,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use hvac_common::{
    Change, Forecast, HeatingCoolingState, RelayActuator, RelayBank, RuntimeConfig,
    TemperatureHistoryEntry, ThermostatEngine,
};

use crate::{
    datalog::{DataLog, DataLogRow},
    relay::HttpSwitchDriver,
    sensor::SensorClient,
    weather::{spawn_weather_loop, WeatherClient, OPENWEATHERMAP_URL},
};

#[derive(Clone)]
struct AppState {
    core: Arc<Mutex<ControllerCore>>,
    forecast: watch::Receiver<Option<Forecast>>,
    sensor: Option<SensorClient>,
    store: AppStore,
    datalog: DataLog,
}

/// Everything one evaluation touches. Holding the lock serialises evaluations.
struct ControllerCore {
    engine: ThermostatEngine,
    relays: RelayBank<HttpSwitchDriver>,
    runtime: RuntimeConfig,
}

impl ControllerCore {
    fn snapshot(&self) -> RuntimeConfig {
        let mut runtime = self.runtime.clone();
        runtime.thermostat = self.engine.config.clone();
        runtime.thermostat_state = self.engine.state().clone();
        runtime.relay_board.switches = self.relays.switches().to_vec();
        runtime
    }
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    history_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = match store.load_runtime_config().await {
        Ok(Some(runtime)) => runtime,
        Ok(None) => {
            let runtime = RuntimeConfig::default();
            info!(
                "no config found, writing defaults to {}",
                store.runtime_path.display()
            );
            if let Err(err) = store.save_runtime_config(&runtime).await {
                warn!("failed to write default config: {err:#}");
            }
            runtime
        }
        Err(err) => {
            warn!("failed to load runtime config from store: {err:#}");
            RuntimeConfig::default()
        }
    };
    apply_env_overrides(&mut runtime, |name| std::env::var(name).ok());
    runtime.sanitize();

    let timeout = Duration::from_secs(runtime.thermostat.http_timeout_secs);

    let driver = HttpSwitchDriver::new(runtime.relay_board.base_url(), timeout)
        .context("failed to build relay client")?;
    let mut relays = RelayBank::new(runtime.relay_board.switches.clone(), driver);
    if let Err(err) = relays.resync().await {
        warn!("initial relay resync failed, keeping persisted switch state: {err}");
    }

    let sensor = if runtime.temperature_sensor.trim().is_empty() {
        warn!("no temperatureSensor configured, periodic evaluation disabled");
        None
    } else {
        Some(
            SensorClient::new(
                runtime.sensor_base_url.clone(),
                runtime.temperature_sensor.clone(),
                timeout,
            )
            .context("failed to build sensor client")?,
        )
    };

    let weather = if runtime.weather_map_api_key.trim().is_empty() {
        None
    } else {
        Some(
            WeatherClient::new(
                OPENWEATHERMAP_URL,
                runtime.weather_map_api_key.clone(),
                runtime.weather_location.clone(),
                timeout,
            )
            .context("failed to build weather client")?,
        )
    };
    let (forecast_tx, forecast_rx) = watch::channel(None);
    spawn_weather_loop(
        weather,
        Duration::from_secs(runtime.thermostat.weather_interval_secs),
        forecast_tx,
    );

    let engine = ThermostatEngine::new(
        runtime.thermostat.clone(),
        runtime.thermostat_state.clone(),
    );
    let evaluation_interval = Duration::from_secs(runtime.thermostat.evaluation_interval_secs);
    let bind_host = runtime.hostname.clone();
    let port = runtime.port;

    let app_state = AppState {
        core: Arc::new(Mutex::new(ControllerCore {
            engine,
            relays,
            runtime,
        })),
        forecast: forecast_rx,
        sensor,
        datalog: DataLog::new(store.data_dir().join("data-log.csv")),
        store,
    };

    spawn_control_loop(app_state.clone(), evaluation_interval);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/current-temperature", get(handle_get_current_temperature))
        .route("/api/current-state", get(handle_get_current_state))
        .route(
            "/api/target-temperature",
            get(handle_get_target_temperature)
                .put(handle_set_target_temperature)
                .post(handle_set_target_temperature),
        )
        .route(
            "/api/target-state",
            get(handle_get_target_state)
                .put(handle_set_target_state)
                .post(handle_set_target_state),
        )
        .route("/api/deltas", get(handle_get_deltas))
        .route("/api/relays", get(handle_get_relays))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = TcpListener::bind((bind_host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind controller server at {bind_host}:{port}"))?;

    info!("controller listening on http://{bind_host}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("THERMOSTAT_HTTP_PORT").and_then(|value| value.parse().ok()) {
        runtime.port = port;
    }
    if let Some(host) = lookup("RELAY_HOST").filter(|value| !value.is_empty()) {
        runtime.relay_board.hostname = host;
    }
    if let Some(url) = lookup("SENSOR_BASE_URL").filter(|value| !value.is_empty()) {
        runtime.sensor_base_url = url;
    }
    if let Some(device) = lookup("TEMPERATURE_SENSOR").filter(|value| !value.is_empty()) {
        runtime.temperature_sensor = device;
    }
    if let Some(key) = lookup("WEATHER_API_KEY").filter(|value| !value.is_empty()) {
        runtime.weather_map_api_key = key;
    }
}

fn spawn_control_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            run_cycle(&app_state).await;
        }
    });
}

async fn run_cycle(app_state: &AppState) {
    let Some(sensor) = &app_state.sensor else {
        return;
    };
    let sample = match sensor.fetch().await {
        Ok(sample) => sample,
        Err(err) => {
            warn!("sensor fetch failed, skipping evaluation: {err}");
            return;
        }
    };
    let forecast = *app_state.forecast.borrow();
    let now = Utc::now();

    let (row, history) = {
        let mut core = app_state.core.lock().await;
        let ControllerCore {
            engine, relays, ..
        } = &mut *core;

        engine.update_forecast(forecast);
        let appended = engine.record_sample(sample);
        engine.evaluate(relays, now).await;

        let comfort = engine.comfort();
        debug!(
            indoor_heat_index = ?comfort.indoor_heat_index,
            outside_temperature = ?comfort.outside_temperature,
            outside_wind_chill = ?comfort.outside_wind_chill,
            "comfort metrics"
        );
        let row = DataLogRow::new(
            now,
            engine.state(),
            comfort.outside_temperature,
            comfort.indoor_heat_index,
        );
        let history: Option<Vec<TemperatureHistoryEntry>> =
            appended.then(|| engine.history().entries().copied().collect());

        persist(&app_state.store, &core).await;
        (row, history)
    };

    if let Err(err) = app_state.datalog.append(&row).await {
        warn!("failed to append data log row: {err:#}");
    }
    if let Some(history) = history {
        if let Err(err) = app_state.store.save_history(&history).await {
            warn!("failed to mirror temperature history: {err:#}");
        }
    }
}

async fn persist(store: &AppStore, core: &ControllerCore) -> bool {
    match store.save_runtime_config(&core.snapshot()).await {
        Ok(()) => true,
        Err(err) => {
            error!("failed to persist thermostat state: {err:#}");
            false
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(core.engine.status(core.relays.switches(), Utc::now()))
}

async fn handle_get_current_temperature(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    let current = core.engine.state();
    Json(json!({
        "currentTemperature": current.current_temperature,
        "currentRelativeHumidity": current.current_relative_humidity,
    }))
}

async fn handle_get_current_state(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(json!({
        "currentHeatingCoolingState": core.engine.state().current_heating_cooling_state,
    }))
}

async fn handle_get_target_temperature(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(json!({ "targetTemperature": core.engine.state().target_temperature }))
}

async fn handle_get_target_state(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(json!({
        "targetHeatingCoolingState": core.engine.state().target_heating_cooling_state,
    }))
}

async fn handle_get_deltas(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(core.engine.deltas(Utc::now()))
}

async fn handle_get_relays(State(state): State<AppState>) -> impl IntoResponse {
    let core = state.core.lock().await;
    Json(core.relays.switches().to_vec())
}

async fn handle_set_target_temperature(
    State(state): State<AppState>,
    body: Bytes,
) -> axum::response::Response {
    let value = match body_value(&body, "targetTemperature") {
        Ok(value) => value,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let Some(target) = value.as_f64().map(|target| target as f32) else {
        return error_response(StatusCode::BAD_REQUEST, "Target temperature must be a number");
    };

    let mut core = state.core.lock().await;
    let ControllerCore {
        engine, relays, ..
    } = &mut *core;
    let change = match engine
        .set_target_temperature_and_evaluate(target, relays, Utc::now())
        .await
    {
        Ok((change, _)) => change,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    respond_after_change(&state.store, &core, change).await
}

async fn handle_set_target_state(
    State(state): State<AppState>,
    body: Bytes,
) -> axum::response::Response {
    let value = match body_value(&body, "targetHeatingCoolingState") {
        Ok(value) => value,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let Ok(mode) = serde_json::from_value::<HeatingCoolingState>(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Target state must be one of OFF, HEAT, COOL, AUTO",
        );
    };

    let mut core = state.core.lock().await;
    let ControllerCore {
        engine, relays, ..
    } = &mut *core;
    let (change, _) = engine
        .set_target_state_and_evaluate(mode, relays, Utc::now())
        .await;

    respond_after_change(&state.store, &core, change).await
}

async fn respond_after_change<T: Serialize>(
    store: &AppStore,
    core: &ControllerCore,
    change: Change<T>,
) -> axum::response::Response {
    if !persist(store, core).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist thermostat state",
        );
    }
    Json(change).into_response()
}

/// Pulls the new value from `{"value": ..}` or the legacy field name.
fn body_value(body: &[u8], legacy_field: &str) -> Result<Value, &'static str> {
    if body.is_empty() {
        return Err("Missing request body");
    }
    match serde_json::from_slice(body).map_err(|_| "Invalid JSON body")? {
        Value::Object(mut object) => object
            .remove("value")
            .or_else(|| object.remove(legacy_field))
            .ok_or("Missing 'value' field"),
        other => Ok(other),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("config.json")),
            history_path: Arc::new(data_dir.join("temperature-history.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.runtime_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default()
    }

    async fn load_runtime_config(&self) -> anyhow::Result<Option<RuntimeConfig>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(Some(
                serde_json::from_slice::<RuntimeConfig>(&raw)
                    .with_context(|| format!("invalid {}", self.runtime_path.display()))?,
            )),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let payload = serde_json::to_vec_pretty(runtime)?;
        self.write(self.runtime_path.as_ref(), payload).await
    }

    async fn save_history(&self, history: &[TemperatureHistoryEntry]) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(history)?;
        self.write(self.history_path.as_ref(), payload).await
    }

    async fn write(&self, path: &Path, payload: Vec<u8>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

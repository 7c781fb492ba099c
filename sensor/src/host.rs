use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info};

const STEP: f32 = 0.15;
const DRIFT: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Heat,
    Cool,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
struct BenchSwitch {
    pin: u8,
    kind: Kind,
    on: bool,
}

/// Simulated room plus the relay board wired to it.
#[derive(Debug)]
struct Bench {
    device: String,
    temperature: f32,
    humidity: f32,
    ambient: f32,
    last_seen: DateTime<Utc>,
    switches: Vec<BenchSwitch>,
}

impl Bench {
    fn step(&mut self, now: DateTime<Utc>) {
        let heating = self.is_on(Kind::Heat);
        let cooling = self.is_on(Kind::Cool);

        if heating && !cooling {
            self.temperature += STEP;
        } else if cooling && !heating {
            self.temperature -= STEP;
        } else {
            let gap = self.ambient - self.temperature;
            self.temperature += gap.clamp(-DRIFT, DRIFT);
        }
        self.humidity = (self.humidity + if cooling { -0.2 } else { 0.05 }).clamp(30.0, 65.0);
        self.last_seen = now;
    }

    fn is_on(&self, kind: Kind) -> bool {
        self.switches
            .iter()
            .any(|switch| switch.kind == kind && switch.on)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceView {
    uuid: String,
    temperature: f32,
    humidity: f32,
    last_seen: String,
}

#[derive(Debug, Serialize)]
struct StateView {
    status: Vec<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type Shared = Arc<Mutex<Bench>>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sensor_port = env_parse("BENCH_SENSOR_PORT", 8081u16);
    let relay_port = env_parse("BENCH_RELAY_PORT", 8082u16);
    let ambient = env_parse("BENCH_AMBIENT", 17.0f32);
    let switches = parse_switches(
        &std::env::var("BENCH_SWITCHES").unwrap_or_else(|_| "1:COOL,2:HEAT".to_string()),
    )?;
    let device = std::env::var("BENCH_DEVICE").unwrap_or_else(|_| "bench".to_string());

    let bench: Shared = Arc::new(Mutex::new(Bench {
        device,
        temperature: ambient,
        humidity: 45.0,
        ambient,
        last_seen: Utc::now(),
        switches,
    }));

    let stepper = bench.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let mut bench = stepper.lock().await;
            bench.step(Utc::now());
            debug!(
                temperature = bench.temperature,
                humidity = bench.humidity,
                "bench stepped"
            );
        }
    });

    let sensor_app = Router::new()
        .route("/devices/{id}", get(handle_get_device))
        .with_state(bench.clone());
    let relay_app = Router::new()
        .route("/state", get(handle_get_state))
        .route("/{pin}/{state}", get(handle_switch))
        .with_state(bench);

    let sensor_listener = TcpListener::bind(("0.0.0.0", sensor_port))
        .await
        .with_context(|| format!("failed to bind bench sensor on port {sensor_port}"))?;
    let relay_listener = TcpListener::bind(("0.0.0.0", relay_port))
        .await
        .with_context(|| format!("failed to bind bench relay board on port {relay_port}"))?;

    info!("bench sensor on :{sensor_port}, relay board on :{relay_port}");
    tokio::try_join!(
        async { axum::serve(sensor_listener, sensor_app).await },
        async { axum::serve(relay_listener, relay_app).await },
    )?;
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_switches(raw: &str) -> anyhow::Result<Vec<BenchSwitch>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (pin, kind) = entry
                .split_once(':')
                .with_context(|| format!("switch '{entry}' must look like PIN:TYPE"))?;
            let pin = pin
                .trim()
                .parse::<u8>()
                .with_context(|| format!("invalid pin in '{entry}'"))?;
            let kind = match kind.trim().to_ascii_uppercase().as_str() {
                "HEAT" => Kind::Heat,
                "COOL" => Kind::Cool,
                _ => Kind::Other,
            };
            Ok(BenchSwitch {
                pin,
                kind,
                on: false,
            })
        })
        .collect()
}

async fn handle_get_device(
    State(bench): State<Shared>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let bench = bench.lock().await;
    if id != bench.device {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    }
    Json(DeviceView {
        uuid: bench.device.clone(),
        temperature: (bench.temperature * 100.0).round() / 100.0,
        humidity: (bench.humidity * 10.0).round() / 10.0,
        last_seen: bench.last_seen.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
    })
    .into_response()
}

async fn handle_get_state(State(bench): State<Shared>) -> impl IntoResponse {
    let bench = bench.lock().await;
    Json(StateView {
        status: bench.switches.iter().map(|switch| switch.on).collect(),
    })
}

async fn handle_switch(
    State(bench): State<Shared>,
    Path((pin, state)): Path<(String, String)>,
) -> axum::response::Response {
    let Ok(pin) = pin.parse::<u8>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid pin");
    };
    let on = match state.as_str() {
        "on" => true,
        "off" => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "State must be 'on' or 'off'"),
    };

    let mut bench = bench.lock().await;
    let Some(switch) = bench.switches.iter_mut().find(|switch| switch.pin == pin) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown pin");
    };
    switch.on = on;
    info!("pin {pin} -> {state}");
    StatusCode::OK.into_response()
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

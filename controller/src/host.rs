use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use heatzone_common::{
    config::clamp_target, state_topic, temperature_topic, zone_of_temperature_topic,
    BroadcastSource, Clock, Event, LocalClock, RuntimeConfig, Temperature, VirtualOutput, Zone,
    ZoneConfig, ZoneStatus,
};
use rumqttc::{AsyncClient, Event as MqttEvent, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::store::{Store, ZoneRecord};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const MAX_BOOST_MINUTES: u32 = 24 * 60;

struct ControlledZone {
    zone: Zone,
    source: Arc<BroadcastSource>,
}

#[derive(Clone)]
struct AppState {
    zones: Arc<BTreeMap<String, Arc<ControlledZone>>>,
    store: Store,
    boost_minutes: u32,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("HEATZONE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.heatzone"));
    let store = Store::new(&data_dir);

    let mut runtime = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();
    info!(data_dir = %data_dir.display(), zones = runtime.zones.len(), "configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(LocalClock);
    let mut zones = BTreeMap::new();
    for config in &runtime.zones {
        let zone = restore_zone(&store, &runtime, config, clock.clone()).await?;
        zones.insert(config.id.clone(), Arc::new(zone));
    }

    let network = &runtime.network;
    let mut mqtt_options =
        MqttOptions::new("heatzone-controller", network.mqtt_host.clone(), network.mqtt_port);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        zones: Arc::new(zones),
        store,
        boost_minutes: runtime.boost_minutes,
    };

    for id in app_state.zones.keys() {
        mqtt.subscribe(temperature_topic(id), QoS::AtMostOnce).await?;
    }
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_state_publish_loop(
        app_state.clone(),
        mqtt,
        Duration::from_millis(runtime.state_publish_interval_ms),
    );

    let app = router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Environment wins over the config file.
fn apply_env_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.network.mqtt_port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(port) = var("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.http_port = port;
    }
}

async fn restore_zone(
    store: &Store,
    runtime: &RuntimeConfig,
    config: &ZoneConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<ControlledZone> {
    let record = store.load_zone(&config.id).await.unwrap_or_else(|err| {
        warn!(zone = %config.id, "failed to load zone from store: {err:#}");
        ZoneRecord::default()
    });

    let output = Arc::new(VirtualOutput::new(format!("{}-valve", config.id)));
    let source = Arc::new(BroadcastSource::new(config.id.clone(), clock.clone()));
    let zone = Zone::new(config.id.clone(), output, clock);

    for event in &record.events {
        zone.events().add_event(*event).await;
    }
    if config.thermostat {
        let target = record
            .thermostat_target
            .map(clamp_target)
            .unwrap_or(config.default_target);
        zone.attach_thermostat(source.as_ref(), target, &runtime.thermostat)
            .with_context(|| format!("failed to attach thermostat to zone {}", config.id))?;
    }
    zone.start().await;

    info!(zone = %config.id, events = record.events.len(), thermostat = config.thermostat, "zone restored");
    Ok(ControlledZone { zone, source })
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/zones", get(handle_list_zones))
        .route("/api/zones/{id}", get(handle_get_zone))
        .route(
            "/api/zones/{id}/events",
            get(handle_get_events)
                .post(handle_add_event)
                .delete(handle_remove_event),
        )
        .route(
            "/api/zones/{id}/boost",
            post(handle_boost).delete(handle_cancel_boost),
        )
        .route("/api/zones/{id}/thermostat", put(handle_set_target))
        .with_state(app_state)
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Incoming::Publish(message))) => {
                    handle_mqtt_message(&app_state, &message.topic, &message.payload);
                }
                Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, mqtt: AsyncClient, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            for (id, controlled) in app_state.zones.iter() {
                let status = controlled.zone.status().await;
                match serde_json::to_vec(&status) {
                    Ok(body) => {
                        if let Err(err) = mqtt
                            .publish(state_topic(id), QoS::AtLeastOnce, true, body)
                            .await
                        {
                            warn!(zone = %id, "zone state publish failed: {err}");
                        }
                    }
                    Err(err) => warn!(zone = %id, "zone state serialization failed: {err}"),
                }
            }
        }
    });
}

fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: &[u8]) {
    let Some(zone_id) = zone_of_temperature_topic(topic) else {
        debug!(topic, "ignoring message on unexpected topic");
        return;
    };
    let Some(controlled) = app_state.zones.get(zone_id) else {
        debug!(zone = zone_id, "reading for unknown zone");
        return;
    };
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(topic, len = payload.len(), "dropping oversized MQTT payload");
        return;
    }

    match parse_reading(payload) {
        Some(temperature) => controlled.source.push(temperature),
        None => warn!(zone = zone_id, "unusable temperature payload"),
    }
}

/// Decimal Celsius, within what a room sensor can plausibly report.
fn parse_reading(payload: &[u8]) -> Option<Temperature> {
    let text = std::str::from_utf8(payload).ok()?;
    let temperature: Temperature = text.trim().parse().ok()?;
    (-40.0..=150.0)
        .contains(&temperature.celsius())
        .then_some(temperature)
}

fn find_zone<'a>(state: &'a AppState, id: &str) -> Result<&'a Arc<ControlledZone>, ApiError> {
    state
        .zones
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("Unknown zone '{id}'")))
}

async fn persist(state: &AppState, id: &str, controlled: &ControlledZone) -> Result<(), ApiError> {
    let record = ZoneRecord {
        events: controlled.zone.events().read_events(),
        thermostat_target: controlled.zone.thermostat().map(|thermostat| thermostat.target()),
    };
    state.store.save_zone(id, &record).await.map_err(|err| {
        error!(zone = id, "failed to persist zone: {err:#}");
        ApiError::internal("Failed to persist zone")
    })
}

async fn handle_list_zones(State(state): State<AppState>) -> Json<Vec<ZoneStatus>> {
    let mut statuses = Vec::with_capacity(state.zones.len());
    for controlled in state.zones.values() {
        statuses.push(controlled.zone.status().await);
    }
    Json(statuses)
}

async fn handle_get_zone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ZoneStatus>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    Ok(Json(controlled.zone.status().await))
}

async fn handle_get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    Ok(Json(controlled.zone.events().read_events()))
}

async fn handle_add_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Event>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<Event>>), ApiError> {
    let controlled = find_zone(&state, &id)?;
    let Json(event) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    controlled.zone.events().add_event(event).await;
    persist(&state, &id, controlled).await?;
    info!(zone = %id, %event, "event added over http");
    Ok((StatusCode::CREATED, Json(controlled.zone.events().read_events())))
}

async fn handle_remove_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Event>, JsonRejection>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    let Json(event) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    if controlled.zone.events().remove_event(event).await == 0 {
        return Err(ApiError::not_found(format!("No event {event} in zone '{id}'")));
    }
    persist(&state, &id, controlled).await?;
    Ok(Json(controlled.zone.events().read_events()))
}

async fn handle_boost(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ZoneStatus>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    let minutes = match params.get("minutes") {
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|minutes| (1..=MAX_BOOST_MINUTES).contains(minutes))
            .ok_or_else(|| ApiError::bad_request("Invalid boost minutes (1-1440)"))?,
        None => state.boost_minutes,
    };

    controlled
        .zone
        .events()
        .boost(Duration::from_secs(u64::from(minutes) * 60))
        .await;
    Ok(Json(controlled.zone.status().await))
}

async fn handle_cancel_boost(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ZoneStatus>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    controlled.zone.events().cancel_boost().await;
    Ok(Json(controlled.zone.status().await))
}

async fn handle_set_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ZoneStatus>, ApiError> {
    let controlled = find_zone(&state, &id)?;
    let Some(value) = params.get("target") else {
        return Err(ApiError::bad_request("Missing 'target' parameter"));
    };
    let Some(target) = value
        .parse::<i32>()
        .ok()
        .map(Temperature::from_millis)
        .filter(|target| clamp_target(*target) == *target)
    else {
        return Err(ApiError::bad_request(
            "Invalid target (millidegrees, 5000-30000)",
        ));
    };
    let Some(thermostat) = controlled.zone.thermostat() else {
        return Err(ApiError::bad_request(format!("Zone '{id}' has no thermostat")));
    };

    thermostat.set(target);
    persist(&state, &id, controlled).await?;
    Ok(Json(controlled.zone.status().await))
}

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use climate_common::ControllerConfig;

use crate::{
    api::{self, AppState},
    gateway::SensorGateway,
    hvac::SimulatedHvac,
    mqtt::{self, MqttSensorGateway, MqttStatusPublisher},
    orchestrator::Thermostat,
    store::SetpointStore,
};

/// Starting room temperature of the simulated unit.
const SIMULATED_AMBIENT: f32 = 26.0;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ControllerConfig::from_env().context("invalid controller configuration")?;
    let store = SetpointStore::open(&config.data_dir, config.default_target)
        .await
        .context("failed to open setpoint store")?;
    info!(path = %store.path().display(), target = ?store.load().await, "setpoint store ready");

    let (mqtt, eventloop) = mqtt::connect(&config.network);
    let mqtt_sensor = MqttSensorGateway::new(config.network.sensor_max_age_ms);
    mqtt::subscribe_topics(&mqtt).await?;
    mqtt::spawn_mqtt_loop(mqtt_sensor.clone(), eventloop);

    let sensor: Arc<dyn SensorGateway> = Arc::new(mqtt_sensor);
    let thermostat = Thermostat::new(
        &config,
        store,
        Arc::new(SimulatedHvac::new(SIMULATED_AMBIENT)),
        sensor.clone(),
        Arc::new(MqttStatusPublisher::new(mqtt)),
    );

    if let Err(err) = thermostat.start().await {
        warn!("controller not started, enable it over HTTP once the device is reachable: {err}");
    }

    let app = api::router(AppState {
        thermostat: thermostat.clone(),
        sensor,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    thermostat.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("unable to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

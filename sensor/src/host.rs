use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use tracing::{debug, info, warn};

use climate_common::{TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_STATUS, TOPIC_SENSOR_TEMP};

const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 30_000;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let interval_ms = std::env::var("SENSOR_PUBLISH_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PUBLISH_INTERVAL_MS)
        .max(1);

    let mut mqtt_options = MqttOptions::new("climate-sensor", mqtt_host, mqtt_port);
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_SENSOR_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!(interval_ms, "sensor publisher started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

    loop {
        interval.tick().await;
        let (temperature, humidity) = simulated_reading(tick);
        tick = tick.saturating_add(1);
        debug!(temperature, humidity, "publishing reading");

        mqtt.publish(
            TOPIC_SENSOR_TEMP,
            QoS::AtLeastOnce,
            true,
            format!("{temperature:.2}"),
        )
        .await
        .context("failed to publish sensor temperature")?;
        mqtt.publish(
            TOPIC_SENSOR_HUMIDITY,
            QoS::AtLeastOnce,
            true,
            format!("{humidity:.1}"),
        )
        .await
        .context("failed to publish sensor humidity")?;
    }
}

/// Slow triangle wave over a day-like cycle: 20.0 to 26.0 °C and back in 48 ticks.
fn simulated_reading(tick: u64) -> (f32, f32) {
    let phase = (tick % 48) as f32;
    let rise = if phase < 24.0 { phase } else { 48.0 - phase };
    let temperature = 20.0 + rise * 0.25;
    let humidity = 42.0 + ((tick % 6) as f32 * 0.5);
    (temperature, humidity)
}

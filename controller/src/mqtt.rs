use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use climate_common::{
    GatewayError, Measurement, NetworkConfig, ThermostatInfo, TOPIC_CONTROLLER_STATE,
    TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_TEMP,
};

use crate::gateway::{SensorGateway, StatusPublisher};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;

pub fn connect(network: &NetworkConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        "climate-controller",
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if !network.mqtt_user.is_empty() {
        options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    AsyncClient::new(options, 64)
}

pub async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_SENSOR_TEMP, TOPIC_SENSOR_HUMIDITY] {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

/// Drives the client; sensor publishes are fed into `sensor`.
pub fn spawn_mqtt_loop(sensor: MqttSensorGateway, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    sensor
                        .record(&message.topic, &message.payload, now_ms())
                        .await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
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

#[derive(Debug, Default, Clone, Copy)]
struct Reading {
    value: f32,
    at_ms: u64,
}

#[derive(Debug, Default)]
struct SensorCache {
    temperature: Option<Reading>,
    humidity: Option<Reading>,
}

/// Latest retained sensor readings, served while younger than `max_age_ms`.
#[derive(Clone)]
pub struct MqttSensorGateway {
    cache: Arc<Mutex<SensorCache>>,
    max_age_ms: u64,
}

impl MqttSensorGateway {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            cache: Arc::new(Mutex::new(SensorCache::default())),
            max_age_ms,
        }
    }

    /// Returns false when the payload was dropped.
    pub async fn record(&self, topic: &str, payload: &[u8], now_ms: u64) -> bool {
        if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                topic,
                payload.len()
            );
            return false;
        }
        let Some(value) = std::str::from_utf8(payload)
            .ok()
            .and_then(|raw| raw.trim().parse::<f32>().ok())
            .filter(|value| value.is_finite())
        else {
            warn!(topic, "ignoring non numeric sensor payload");
            return false;
        };

        let reading = Reading { value, at_ms: now_ms };
        let mut cache = self.cache.lock().await;
        match topic {
            TOPIC_SENSOR_TEMP if (-40.0..=60.0).contains(&value) => {
                cache.temperature = Some(reading);
            }
            TOPIC_SENSOR_HUMIDITY if (0.0..=100.0).contains(&value) => {
                cache.humidity = Some(reading);
            }
            _ => {
                debug!(topic, value, "sensor value rejected");
                return false;
            }
        }
        true
    }

    pub async fn measurement_at(&self, now_ms: u64) -> Result<Measurement, GatewayError> {
        let cache = self.cache.lock().await;
        let (Some(temperature), Some(humidity)) = (cache.temperature, cache.humidity) else {
            return Err(GatewayError::Transient(
                "no sensor reading received yet".to_string(),
            ));
        };

        let oldest = temperature.at_ms.min(humidity.at_ms);
        let age = now_ms.saturating_sub(oldest);
        if age > self.max_age_ms {
            return Err(GatewayError::Transient(format!(
                "latest sensor reading is {age}ms old"
            )));
        }

        Ok(Measurement {
            temperature: temperature.value,
            humidity: humidity.value,
            received_at_ms: temperature.at_ms.max(humidity.at_ms),
        })
    }
}

#[async_trait]
impl SensorGateway for MqttSensorGateway {
    async fn get_measurement(&self) -> Result<Measurement, GatewayError> {
        self.measurement_at(now_ms()).await
    }
}

pub struct MqttStatusPublisher {
    mqtt: AsyncClient,
}

impl MqttStatusPublisher {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }
}

#[async_trait]
impl StatusPublisher for MqttStatusPublisher {
    async fn publish(&self, info: &ThermostatInfo) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(info)
            .map_err(|err| GatewayError::Transient(format!("unable to encode status: {err}")))?;
        self.mqtt
            .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
            .await
            .map_err(|err| GatewayError::Transient(format!("controller state publish: {err}")))
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().try_into().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_fresh_pair_of_readings() {
        let sensor = MqttSensorGateway::new(1_000);
        assert!(sensor.record(TOPIC_SENSOR_TEMP, b"21.5", 10_000).await);
        assert!(sensor.record(TOPIC_SENSOR_HUMIDITY, b" 40.0\n", 10_200).await);

        let measurement = sensor.measurement_at(10_500).await.unwrap();

        assert_eq!(measurement.temperature, 21.5);
        assert_eq!(measurement.humidity, 40.0);
        assert_eq!(measurement.received_at_ms, 10_200);
    }

    #[tokio::test]
    async fn missing_or_stale_readings_are_transient() {
        let sensor = MqttSensorGateway::new(1_000);
        sensor.record(TOPIC_SENSOR_TEMP, b"21.5", 10_000).await;

        assert!(matches!(
            sensor.measurement_at(10_100).await,
            Err(GatewayError::Transient(_))
        ));

        sensor.record(TOPIC_SENSOR_HUMIDITY, b"40", 10_000).await;
        assert!(sensor.measurement_at(11_000).await.is_ok());
        assert!(matches!(
            sensor.measurement_at(11_001).await,
            Err(GatewayError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn implausible_payloads_are_dropped() {
        let sensor = MqttSensorGateway::new(1_000);

        assert!(!sensor.record(TOPIC_SENSOR_TEMP, b"hot", 1).await);
        assert!(!sensor.record(TOPIC_SENSOR_TEMP, b"NaN", 1).await);
        assert!(!sensor.record(TOPIC_SENSOR_TEMP, b"75.0", 1).await);
        assert!(!sensor.record(TOPIC_SENSOR_HUMIDITY, b"101", 1).await);
        assert!(!sensor.record("climate/other", b"20", 1).await);
        assert!(!sensor.record(TOPIC_SENSOR_TEMP, &[b'1'; 65], 1).await);

        assert!(sensor.measurement_at(1).await.is_err());
    }
}

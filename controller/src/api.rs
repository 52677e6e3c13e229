use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use climate_common::{ControllerError, ErrorKind, TargetState};

use crate::{gateway::SensorGateway, orchestrator::Thermostat};

#[derive(Clone)]
pub struct AppState {
    pub thermostat: Thermostat,
    pub sensor: Arc<dyn SensorGateway>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/thermostat/info", get(handle_get_info))
        .route("/v1/thermostat/setpoints", put(handle_put_setpoints))
        .route("/v1/thermostat/enable", put(handle_enable))
        .route("/v1/thermostat/disable", put(handle_disable))
        .route("/v1/sensor", get(handle_get_sensor))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_get_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.thermostat.status().await)
}

async fn handle_put_setpoints(
    State(state): State<AppState>,
    Json(target): Json<TargetState>,
) -> Response {
    match state.thermostat.update_targets(target).await {
        Ok(info) => Json(info).into_response(),
        Err(err) => controller_error_response(&err),
    }
}

async fn handle_enable(State(state): State<AppState>) -> Response {
    info!("enable requested");
    if let Err(err) = state.thermostat.start().await {
        return controller_error_response(&err);
    }
    Json(state.thermostat.status().await).into_response()
}

async fn handle_disable(State(state): State<AppState>) -> Response {
    info!("disable requested");
    state.thermostat.stop().await;
    Json(state.thermostat.status().await).into_response()
}

async fn handle_get_sensor(State(state): State<AppState>) -> Response {
    match state.sensor.get_measurement().await {
        Ok(measurement) => Json(measurement).into_response(),
        Err(err) => controller_error_response(&ControllerError::from(err)),
    }
}

fn controller_error_response(err: &ControllerError) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Initialization | ErrorKind::TransientGateway | ErrorKind::Data => {
            warn!(kind = %err.kind(), "request failed: {}", err.message());
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.message())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use climate_common::{
        ControlConfig, ControllerConfig, NetworkConfig, ScheduleConfig, TOPIC_SENSOR_HUMIDITY,
        TOPIC_SENSOR_TEMP,
    };

    use super::*;
    use crate::{
        gateway::NoopPublisher, hvac::SimulatedHvac, mqtt::MqttSensorGateway,
        store::SetpointStore,
    };

    async fn app(data_dir: &std::path::Path, sensor: MqttSensorGateway) -> Router {
        let config = ControllerConfig {
            data_dir: data_dir.to_path_buf(),
            control: ControlConfig::default(),
            schedule: ScheduleConfig::default(),
            network: NetworkConfig::default(),
            default_target: TargetState::Setpoints {
                cool_setpoint: 24.0,
                heat_setpoint: 20.0,
            },
        };
        let store = SetpointStore::open(&config.data_dir, config.default_target)
            .await
            .unwrap();
        let sensor: Arc<dyn SensorGateway> = Arc::new(sensor);
        let thermostat = Thermostat::new(
            &config,
            store,
            Arc::new(SimulatedHvac::new(22.0)),
            sensor.clone(),
            Arc::new(NoopPublisher),
        );
        router(AppState { thermostat, sensor })
    }

    async fn reading_sensor(temperature: &str) -> MqttSensorGateway {
        let sensor = MqttSensorGateway::new(60_000);
        let now = Utc::now().timestamp_millis() as u64;
        sensor
            .record(TOPIC_SENSOR_TEMP, temperature.as_bytes(), now)
            .await;
        sensor.record(TOPIC_SENSOR_HUMIDITY, b"40", now).await;
        sensor
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn info_reports_stopped_before_enable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), reading_sensor("22.0").await).await;

        let (status, body) = send(&app, "GET", "/v1/thermostat/info", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "STOPPED");
        assert_eq!(body["coolSetpoint"], 24.0);
        assert_eq!(body["target"], json!({"coolSetpoint": 24.0, "heatSetpoint": 20.0}));
    }

    #[tokio::test]
    async fn setpoints_need_a_ready_controller() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), reading_sensor("22.0").await).await;

        let (status, body) = send(
            &app,
            "PUT",
            "/v1/thermostat/setpoints",
            Some(json!({"coolSetpoint": 25.0, "heatSetpoint": 21.0})),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "Thermostat manager not ready");
    }

    #[tokio::test]
    async fn enable_update_and_disable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), reading_sensor("22.0").await).await;

        let (status, body) = send(&app, "PUT", "/v1/thermostat/enable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "IDLE");
        assert_eq!(body["deviceId"], "sim-hvac-1");

        let (status, body) = send(
            &app,
            "PUT",
            "/v1/thermostat/setpoints",
            Some(json!({"coolSetpoint": 25.0, "heatSetpoint": 21.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coolSetpoint"], 25.0);

        let (status, body) = send(
            &app,
            "PUT",
            "/v1/thermostat/setpoints",
            Some(json!({"coolSetpoint": 18.0, "heatSetpoint": 20.0})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "Cool setpoint cannot be smaller than heat setpoint");

        let (status, body) = send(
            &app,
            "PUT",
            "/v1/thermostat/setpoints",
            Some(json!({"targetTemperature": 22.0, "tolerance": 0.5})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["error"],
            "Difference between cool and heat setpoint too small"
        );

        let (status, body) = send(&app, "PUT", "/v1/thermostat/disable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "STOPPED");
        assert_eq!(body["coolSetpoint"], 25.0);
    }

    #[tokio::test]
    async fn sensor_endpoint_serves_live_reading_or_500() {
        let dir = tempfile::tempdir().unwrap();
        let app_with_reading = app(dir.path(), reading_sensor("21.5").await).await;
        let (status, body) = send(&app_with_reading, "GET", "/v1/sensor", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature"], 21.5);

        let silent = app(dir.path(), MqttSensorGateway::new(60_000)).await;
        let (status, body) = send(&silent, "GET", "/v1/sensor", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "no sensor reading received yet");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TargetState;

/// What the HVAC unit reports it is physically doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentStatus {
    Cool,
    OverCool,
    Heat,
    Fan,
    Idle,
}

impl EquipmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "COOL",
            Self::OverCool => "OVER_COOL",
            Self::Heat => "HEAT",
            Self::Fan => "FAN",
            Self::Idle => "IDLE",
        }
    }

    /// Fan and over-cool are not regimes the controller drives toward.
    pub fn regime(self) -> Option<Regime> {
        match self {
            Self::Cool => Some(Regime::Cool),
            Self::Heat => Some(Regime::Heat),
            Self::Idle => Some(Regime::Idle),
            Self::OverCool | Self::Fan => None,
        }
    }
}

/// Operating mode accepted by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Off,
    Heat,
    Cool,
    Auto,
    EmergencyHeat,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Auto => "AUTO",
            Self::EmergencyHeat => "EMERGENCY_HEAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Cool,
    Heat,
    Idle,
}

impl Regime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::Idle => "IDLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub id: String,
    pub name: String,
    pub model: String,
    pub firmware_version: String,
}

/// Point-in-time view of the managed unit. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: String,
    pub equipment_status: EquipmentStatus,
    pub mode: Mode,
    pub temp_indoor: f32,
    pub hum_indoor: f32,
    pub heat_setpoint: f32,
    pub cool_setpoint: f32,
    pub setpoint_delta: f32,
    pub setpoint_minimum: f32,
    pub setpoint_maximum: f32,
}

impl DeviceSnapshot {
    /// Clamps without panicking on an inverted range reported by the device.
    pub fn clamp_setpoint(&self, value: f32) -> f32 {
        value.max(self.setpoint_minimum).min(self.setpoint_maximum)
    }

    pub fn within_bounds(&self, value: f32) -> bool {
        value >= self.setpoint_minimum && value <= self.setpoint_maximum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub temperature: f32,
    pub humidity: f32,
    #[serde(default)]
    pub received_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeCommand {
    pub mode: Mode,
    pub heat_setpoint: f32,
    pub cool_setpoint: f32,
}

/// Epoch-millisecond bookkeeping for staleness and rate limiting. `None` means never.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlTimers {
    pub last_device_update_ms: Option<u64>,
    pub last_sensor_poll_ms: Option<u64>,
    pub last_measurement_ms: Option<u64>,
    pub last_command_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    Stopped,
    Error,
}

impl RunState {
    pub fn derive(running: bool, sensor_failures: u32, failure_threshold: u32) -> Self {
        if running {
            Self::Running
        } else if sensor_failures >= failure_threshold {
            Self::Error
        } else {
            Self::Stopped
        }
    }
}

/// Status reported to API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatStatus {
    Off,
    Cool,
    Heat,
    Idle,
    Error,
    Stopped,
}

impl ThermostatStatus {
    pub fn resolve(run_state: RunState, device: Option<&DeviceSnapshot>) -> Self {
        match run_state {
            RunState::Error => return Self::Error,
            RunState::Stopped => return Self::Stopped,
            RunState::Running => {}
        }
        match device.and_then(|device| device.equipment_status.regime()) {
            Some(Regime::Cool) => Self::Cool,
            Some(Regime::Heat) => Self::Heat,
            Some(Regime::Idle) => Self::Idle,
            None => Self::Off,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::Idle => "IDLE",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatInfo {
    pub status: ThermostatStatus,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(rename = "sensorTemperature")]
    pub sensor_temperature: Option<f32>,
    #[serde(rename = "sensorHumidity")]
    pub sensor_humidity: Option<f32>,
    pub target: TargetState,
    #[serde(rename = "coolSetpoint")]
    pub cool_setpoint: f32,
    #[serde(rename = "heatSetpoint")]
    pub heat_setpoint: f32,
    #[serde(rename = "thermostatCoolSetpoint")]
    pub thermostat_cool_setpoint: Option<f32>,
    #[serde(rename = "thermostatHeatSetpoint")]
    pub thermostat_heat_setpoint: Option<f32>,
    #[serde(rename = "lowestTemperature")]
    pub lowest_temperature: Option<f32>,
    #[serde(rename = "highestTemperature")]
    pub highest_temperature: Option<f32>,
    #[serde(rename = "sensorPollFailures")]
    pub sensor_poll_failures: u32,
    #[serde(rename = "deviceUpdatedLast")]
    pub device_updated_last: Option<DateTime<Utc>>,
    #[serde(rename = "thermostatUpdatedLast")]
    pub thermostat_updated_last: Option<DateTime<Utc>>,
    #[serde(rename = "sensorPolledLast")]
    pub sensor_polled_last: Option<DateTime<Utc>>,
}

pub fn epoch_ms_to_datetime(ms: Option<u64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| i64::try_from(ms).ok())
        .and_then(DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reported_only_when_stopped_past_threshold() {
        assert_eq!(RunState::derive(true, 9, 5), RunState::Running);
        assert_eq!(RunState::derive(false, 4, 5), RunState::Stopped);
        assert_eq!(RunState::derive(false, 5, 5), RunState::Error);
    }

    #[test]
    fn status_follows_equipment_while_running() {
        let device = DeviceSnapshot {
            id: "dev".to_string(),
            equipment_status: EquipmentStatus::Fan,
            mode: Mode::Auto,
            temp_indoor: 22.0,
            hum_indoor: 40.0,
            heat_setpoint: 20.0,
            cool_setpoint: 24.0,
            setpoint_delta: 2.0,
            setpoint_minimum: 10.0,
            setpoint_maximum: 32.0,
        };

        assert_eq!(
            ThermostatStatus::resolve(RunState::Running, Some(&device)),
            ThermostatStatus::Off
        );
        assert_eq!(
            ThermostatStatus::resolve(RunState::Running, None),
            ThermostatStatus::Off
        );
        assert_eq!(
            ThermostatStatus::resolve(RunState::Stopped, Some(&device)),
            ThermostatStatus::Stopped
        );
    }

    #[test]
    fn clamp_tolerates_inverted_range() {
        let mut device = DeviceSnapshot {
            id: "dev".to_string(),
            equipment_status: EquipmentStatus::Idle,
            mode: Mode::Auto,
            temp_indoor: 22.0,
            hum_indoor: 40.0,
            heat_setpoint: 20.0,
            cool_setpoint: 24.0,
            setpoint_delta: 2.0,
            setpoint_minimum: 10.0,
            setpoint_maximum: 32.0,
        };
        assert_eq!(device.clamp_setpoint(40.0), 32.0);
        assert_eq!(device.clamp_setpoint(5.0), 10.0);

        device.setpoint_minimum = 30.0;
        device.setpoint_maximum = 20.0;
        assert_eq!(device.clamp_setpoint(25.0), 20.0);
    }
}

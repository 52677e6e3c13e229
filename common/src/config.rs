use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ControllerError, types::DeviceSnapshot};

/// Tuning for the pure decision logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub adjustment_increment: f32,
    pub max_device_staleness_ms: u64,
    pub max_thermostat_update_frequency_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            adjustment_increment: 1.0,
            max_device_staleness_ms: 900_000,
            max_thermostat_update_frequency_ms: 300_000,
        }
    }
}

/// Cadences and escalation limits for the repeating tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub sensor_poll_interval_ms: u64,
    pub device_refresh_interval_ms: u64,
    pub control_interval_ms: u64,
    pub broadcast_interval_ms: u64,
    pub error_after_sensor_poll_failures: u32,
    pub gateway_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sensor_poll_interval_ms: 30_000,
            device_refresh_interval_ms: 60_000,
            control_interval_ms: 30_000,
            broadcast_interval_ms: 10_000,
            error_after_sensor_poll_failures: 5,
            gateway_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub http_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub sensor_max_age_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            sensor_max_age_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub data_dir: PathBuf,
    pub control: ControlConfig,
    pub schedule: ScheduleConfig,
    pub network: NetworkConfig,
    pub default_target: TargetState,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Only `DATA_DIR` is mandatory.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("DATA_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                ControllerError::Data("Unable to determine data directory".to_string())
            })?;

        let control_defaults = ControlConfig::default();
        let control = ControlConfig {
            adjustment_increment: parse_or(
                &lookup,
                "THERMOSTAT_ADJUSTMENT_INCREMENT",
                control_defaults.adjustment_increment,
            )?,
            max_device_staleness_ms: parse_or(
                &lookup,
                "MAX_DEVICE_STALENESS_MS",
                control_defaults.max_device_staleness_ms,
            )?,
            max_thermostat_update_frequency_ms: parse_or(
                &lookup,
                "MAX_THERMOSTAT_UPDATE_FREQUENCY_MS",
                control_defaults.max_thermostat_update_frequency_ms,
            )?,
        };

        let schedule_defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            sensor_poll_interval_ms: parse_or(
                &lookup,
                "SENSOR_POLL_INTERVAL_MS",
                schedule_defaults.sensor_poll_interval_ms,
            )?,
            device_refresh_interval_ms: parse_or(
                &lookup,
                "UPDATE_THERMOSTAT_INTERVAL_MS",
                schedule_defaults.device_refresh_interval_ms,
            )?,
            control_interval_ms: parse_or(
                &lookup,
                "TEMPERATURE_CONTROLLER_INTERVAL_MS",
                schedule_defaults.control_interval_ms,
            )?,
            broadcast_interval_ms: parse_or(
                &lookup,
                "WS_UPDATE_INTERVAL_MS",
                schedule_defaults.broadcast_interval_ms,
            )?,
            error_after_sensor_poll_failures: parse_or(
                &lookup,
                "ERROR_AFTER_NUM_SENSOR_POLL_FAILURES",
                schedule_defaults.error_after_sensor_poll_failures,
            )?,
            gateway_timeout_ms: parse_or(
                &lookup,
                "GATEWAY_TIMEOUT_MS",
                schedule_defaults.gateway_timeout_ms,
            )?,
        };

        let network_defaults = NetworkConfig::default();
        let network = NetworkConfig {
            http_port: parse_or(&lookup, "SERVER_PORT", network_defaults.http_port)?,
            mqtt_host: lookup("MQTT_HOST").unwrap_or(network_defaults.mqtt_host),
            mqtt_port: parse_or(&lookup, "MQTT_PORT", network_defaults.mqtt_port)?,
            mqtt_user: lookup("MQTT_USER").unwrap_or_default(),
            mqtt_pass: lookup("MQTT_PASS").unwrap_or_default(),
            sensor_max_age_ms: parse_or(
                &lookup,
                "SENSOR_MAX_AGE_MS",
                network_defaults.sensor_max_age_ms,
            )?,
        };

        let target_temperature: Option<f32> = parse_opt(&lookup, "TARGET_TEMPERATURE")?;
        let default_target = match target_temperature {
            Some(target_temperature) => TargetState::Band {
                target_temperature,
                tolerance: parse_or(&lookup, "TARGET_TOLERANCE", 1.0)?,
            },
            None => TargetState::Setpoints {
                cool_setpoint: parse_or(&lookup, "COOL_SETPOINT", 24.0)?,
                heat_setpoint: parse_or(&lookup, "HEAT_SETPOINT", 20.0)?,
            },
        };
        default_target.validate_shape().map_err(|err| {
            ControllerError::Data(format!("default targets rejected: {}", err.message()))
        })?;

        Ok(Self {
            data_dir,
            control,
            schedule,
            network,
            default_target,
        })
    }
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ControllerError::Data(format!("{key} has invalid value '{raw}'"))),
        None => Ok(None),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

/// User-configured goal. Persisted to the state file in exactly this shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetState {
    Setpoints {
        #[serde(rename = "coolSetpoint")]
        cool_setpoint: f32,
        #[serde(rename = "heatSetpoint")]
        heat_setpoint: f32,
    },
    Band {
        #[serde(rename = "targetTemperature")]
        target_temperature: f32,
        tolerance: f32,
    },
}

impl TargetState {
    /// `(cool threshold, heat threshold)`: above the first we cool, below the second we heat.
    pub fn thresholds(&self) -> (f32, f32) {
        match *self {
            Self::Setpoints {
                cool_setpoint,
                heat_setpoint,
            } => (cool_setpoint, heat_setpoint),
            Self::Band {
                target_temperature,
                tolerance,
            } => (target_temperature + tolerance, target_temperature - tolerance),
        }
    }

    /// Checks that hold regardless of which device is attached.
    pub fn validate_shape(&self) -> Result<(), ControllerError> {
        if let Self::Band { tolerance, .. } = *self {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(ControllerError::Validation(
                    "Tolerance must be a non-negative number".to_string(),
                ));
            }
        }
        let (cool, heat) = self.thresholds();
        if !cool.is_finite() || !heat.is_finite() {
            return Err(ControllerError::Validation(
                "Setpoints must be finite numbers".to_string(),
            ));
        }
        if cool < heat {
            return Err(ControllerError::Validation(
                "Cool setpoint cannot be smaller than heat setpoint".to_string(),
            ));
        }
        Ok(())
    }

    /// Full update validation against the limits the device reports.
    pub fn validate_for(&self, device: &DeviceSnapshot) -> Result<(), ControllerError> {
        let (cool, heat) = self.thresholds();
        if !cool.is_finite() || !device.within_bounds(cool) {
            return Err(ControllerError::Validation(
                "Cool setpoint out of bounds".to_string(),
            ));
        }
        if !heat.is_finite() || !device.within_bounds(heat) {
            return Err(ControllerError::Validation(
                "Heat setpoint out of bounds".to_string(),
            ));
        }
        self.validate_shape()?;
        if cool - heat < device.setpoint_delta {
            return Err(ControllerError::Validation(
                "Difference between cool and heat setpoint too small".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk form with every field optional; gaps are filled from configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredTargets {
    #[serde(rename = "coolSetpoint", default)]
    pub cool_setpoint: Option<f32>,
    #[serde(rename = "heatSetpoint", default)]
    pub heat_setpoint: Option<f32>,
    #[serde(rename = "targetTemperature", default)]
    pub target_temperature: Option<f32>,
    #[serde(default)]
    pub tolerance: Option<f32>,
}

impl StoredTargets {
    pub fn resolve(self, defaults: TargetState) -> Result<TargetState, ControllerError> {
        let resolved = if self.cool_setpoint.is_some() || self.heat_setpoint.is_some() {
            let (default_cool, default_heat) = defaults.thresholds();
            TargetState::Setpoints {
                cool_setpoint: self.cool_setpoint.unwrap_or(default_cool),
                heat_setpoint: self.heat_setpoint.unwrap_or(default_heat),
            }
        } else if self.target_temperature.is_some() || self.tolerance.is_some() {
            let (default_target, default_tolerance) = match defaults {
                TargetState::Band {
                    target_temperature,
                    tolerance,
                } => (target_temperature, tolerance),
                TargetState::Setpoints {
                    cool_setpoint,
                    heat_setpoint,
                } => (
                    (cool_setpoint + heat_setpoint) / 2.0,
                    (cool_setpoint - heat_setpoint) / 2.0,
                ),
            };
            TargetState::Band {
                target_temperature: self.target_temperature.unwrap_or(default_target),
                tolerance: self.tolerance.unwrap_or(default_tolerance),
            }
        } else {
            defaults
        };

        resolved.validate_shape().map_err(|err| {
            ControllerError::Data(format!("stored targets rejected: {}", err.message()))
        })?;
        Ok(resolved)
    }
}

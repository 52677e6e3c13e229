pub mod config;
pub mod error;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{
    ControlConfig, ControllerConfig, NetworkConfig, ScheduleConfig, StoredTargets, TargetState,
};
pub use error::{ControllerError, ErrorKind, GatewayError};
pub use thermostat::{Action, ControlEngine};
pub use topics::*;
pub use types::{
    ControlTimers, DeviceRef, DeviceSnapshot, EquipmentStatus, Measurement, Mode, ModeCommand,
    Regime, RunState, ThermostatInfo, ThermostatStatus,
};

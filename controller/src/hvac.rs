use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use climate_common::{
    DeviceRef, DeviceSnapshot, EquipmentStatus, GatewayError, Mode, ModeCommand,
};

use crate::gateway::DeviceGateway;

const SIMULATED_DEVICE_ID: &str = "sim-hvac-1";

/// In-memory HVAC unit for running the controller without a vendor cloud.
///
/// Every snapshot read advances the room one step: an active regime pulls the indoor
/// temperature toward its setpoint, an idle unit lets it drift toward `ambient`.
pub struct SimulatedHvac {
    device: DeviceRef,
    ambient: f32,
    drift_per_step: f32,
    state: Mutex<DeviceSnapshot>,
}

impl SimulatedHvac {
    pub fn new(ambient: f32) -> Self {
        let snapshot = DeviceSnapshot {
            id: SIMULATED_DEVICE_ID.to_string(),
            equipment_status: EquipmentStatus::Idle,
            mode: Mode::Auto,
            temp_indoor: ambient,
            hum_indoor: 45.0,
            heat_setpoint: 20.0,
            cool_setpoint: 24.0,
            setpoint_delta: 2.0,
            setpoint_minimum: 10.0,
            setpoint_maximum: 32.0,
        };
        Self::with_snapshot(snapshot, ambient)
    }

    pub fn with_snapshot(snapshot: DeviceSnapshot, ambient: f32) -> Self {
        Self {
            device: DeviceRef {
                id: snapshot.id.clone(),
                name: "Simulated HVAC".to_string(),
                model: "SIM-1".to_string(),
                firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            ambient,
            drift_per_step: 0.25,
            state: Mutex::new(snapshot),
        }
    }

    fn check_id(&self, device_id: &str) -> Result<(), GatewayError> {
        if device_id == self.device.id {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!("unknown device {device_id}")))
        }
    }

    fn step(&self, snapshot: &mut DeviceSnapshot) {
        let drift = self.drift_per_step;
        let indoor = snapshot.temp_indoor;
        snapshot.temp_indoor = match snapshot.equipment_status {
            EquipmentStatus::Cool | EquipmentStatus::OverCool => {
                (indoor - drift).max(snapshot.cool_setpoint)
            }
            EquipmentStatus::Heat => (indoor + drift).min(snapshot.heat_setpoint),
            EquipmentStatus::Idle | EquipmentStatus::Fan => {
                if indoor > self.ambient {
                    (indoor - drift).max(self.ambient)
                } else {
                    (indoor + drift).min(self.ambient)
                }
            }
        };
        snapshot.equipment_status = equipment_for(snapshot);
    }
}

/// What a real unit would be doing for its mode, setpoints and room temperature.
fn equipment_for(snapshot: &DeviceSnapshot) -> EquipmentStatus {
    let wants_cool = snapshot.temp_indoor > snapshot.cool_setpoint;
    let wants_heat = snapshot.temp_indoor < snapshot.heat_setpoint;
    match snapshot.mode {
        Mode::Cool if wants_cool => EquipmentStatus::Cool,
        Mode::Heat | Mode::EmergencyHeat if wants_heat => EquipmentStatus::Heat,
        Mode::Auto if wants_cool => EquipmentStatus::Cool,
        Mode::Auto if wants_heat => EquipmentStatus::Heat,
        _ => EquipmentStatus::Idle,
    }
}

#[async_trait]
impl DeviceGateway for SimulatedHvac {
    async fn list_devices(&self) -> Result<Vec<DeviceRef>, GatewayError> {
        Ok(vec![self.device.clone()])
    }

    async fn get_device(&self, device_id: &str) -> Result<DeviceSnapshot, GatewayError> {
        self.check_id(device_id)?;
        let mut snapshot = self.state.lock().await;
        self.step(&mut snapshot);
        debug!(
            temp_indoor = snapshot.temp_indoor,
            equipment = snapshot.equipment_status.as_str(),
            "simulated hvac step"
        );
        Ok(snapshot.clone())
    }

    async fn apply_mode(&self, device_id: &str, command: ModeCommand) -> Result<(), GatewayError> {
        self.check_id(device_id)?;
        let mut snapshot = self.state.lock().await;

        for value in [command.heat_setpoint, command.cool_setpoint] {
            if !snapshot.within_bounds(value) {
                return Err(GatewayError::Validation(format!(
                    "setpoint {value} outside [{}, {}]",
                    snapshot.setpoint_minimum, snapshot.setpoint_maximum
                )));
            }
        }
        let spread = command.cool_setpoint - command.heat_setpoint;
        if spread < snapshot.setpoint_delta - 1e-3 {
            return Err(GatewayError::Validation(format!(
                "setpoints closer than {}",
                snapshot.setpoint_delta
            )));
        }

        snapshot.mode = command.mode;
        snapshot.heat_setpoint = command.heat_setpoint;
        snapshot.cool_setpoint = command.cool_setpoint;
        snapshot.equipment_status = equipment_for(&snapshot);
        info!(
            mode = command.mode.as_str(),
            heat = command.heat_setpoint,
            cool = command.cool_setpoint,
            equipment = snapshot.equipment_status.as_str(),
            "simulated hvac accepted command"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cool_command_starts_cooling_and_room_follows() {
        let hvac = SimulatedHvac::new(26.0);
        let id = hvac.list_devices().await.unwrap()[0].id.clone();

        hvac.apply_mode(
            &id,
            ModeCommand {
                mode: Mode::Cool,
                heat_setpoint: 23.0,
                cool_setpoint: 25.0,
            },
        )
        .await
        .unwrap();

        let first = hvac.get_device(&id).await.unwrap();
        assert_eq!(first.equipment_status, EquipmentStatus::Cool);
        assert_eq!(first.temp_indoor, 25.75);

        for _ in 0..2 {
            hvac.get_device(&id).await.unwrap();
        }
        let settled = hvac.get_device(&id).await.unwrap();
        assert_eq!(settled.temp_indoor, 25.0);
        assert_eq!(settled.equipment_status, EquipmentStatus::Idle);
    }

    #[tokio::test]
    async fn rejects_commands_the_unit_cannot_hold() {
        let hvac = SimulatedHvac::new(22.0);

        let out_of_range = hvac
            .apply_mode(
                SIMULATED_DEVICE_ID,
                ModeCommand {
                    mode: Mode::Heat,
                    heat_setpoint: 35.0,
                    cool_setpoint: 37.0,
                },
            )
            .await;
        let too_close = hvac
            .apply_mode(
                SIMULATED_DEVICE_ID,
                ModeCommand {
                    mode: Mode::Heat,
                    heat_setpoint: 21.0,
                    cool_setpoint: 22.0,
                },
            )
            .await;

        assert!(matches!(out_of_range, Err(GatewayError::Validation(_))));
        assert!(matches!(too_close, Err(GatewayError::Validation(_))));
        assert!(matches!(
            hvac.get_device("other").await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn idle_room_drifts_toward_ambient() {
        let mut snapshot = SimulatedHvac::new(22.0).state.into_inner();
        snapshot.temp_indoor = 21.0;
        let hvac = SimulatedHvac::with_snapshot(snapshot, 22.0);

        let next = hvac.get_device(SIMULATED_DEVICE_ID).await.unwrap();

        assert_eq!(next.temp_indoor, 21.25);
        assert_eq!(next.equipment_status, EquipmentStatus::Idle);
    }
}

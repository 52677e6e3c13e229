use async_trait::async_trait;

use climate_common::{
    DeviceRef, DeviceSnapshot, GatewayError, Measurement, ModeCommand, ThermostatInfo,
};

/// The one HVAC unit under control, reached through its vendor cloud.
#[async_trait]
pub trait DeviceGateway: Send + Sync + 'static {
    async fn list_devices(&self) -> Result<Vec<DeviceRef>, GatewayError>;

    async fn get_device(&self, device_id: &str) -> Result<DeviceSnapshot, GatewayError>;

    async fn apply_mode(&self, device_id: &str, command: ModeCommand) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait SensorGateway: Send + Sync + 'static {
    async fn get_measurement(&self) -> Result<Measurement, GatewayError>;
}

/// Fire-and-forget status broadcast.
#[async_trait]
pub trait StatusPublisher: Send + Sync + 'static {
    async fn publish(&self, info: &ThermostatInfo) -> Result<(), GatewayError>;
}

#[cfg(test)]
pub struct NoopPublisher;

#[cfg(test)]
#[async_trait]
impl StatusPublisher for NoopPublisher {
    async fn publish(&self, _info: &ThermostatInfo) -> Result<(), GatewayError> {
        Ok(())
    }
}

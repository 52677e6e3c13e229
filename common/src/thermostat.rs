use crate::{
    config::{ControlConfig, TargetState},
    types::{
        ControlTimers, DeviceSnapshot, EquipmentStatus, Measurement, Mode, ModeCommand, Regime,
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Cool(ModeCommand),
    Heat(ModeCommand),
    /// Release an active regime by pushing its setpoint back toward ambient.
    Idle(ModeCommand),
    NoOp,
}

impl Action {
    pub fn command(&self) -> Option<&ModeCommand> {
        match self {
            Self::Cool(command) | Self::Heat(command) | Self::Idle(command) => Some(command),
            Self::NoOp => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Stateless decision procedure. Every input arrives as an argument, so the same
/// inputs always produce the same [`Action`].
#[derive(Debug, Clone)]
pub struct ControlEngine {
    pub config: ControlConfig,
}

impl ControlEngine {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn desired_regime(&self, temperature: f32, target: &TargetState) -> Regime {
        let (cool_threshold, heat_threshold) = target.thresholds();
        if temperature > cool_threshold {
            Regime::Cool
        } else if temperature < heat_threshold {
            Regime::Heat
        } else {
            Regime::Idle
        }
    }

    pub fn is_device_stale(&self, timers: &ControlTimers, now_ms: u64) -> bool {
        timers
            .last_device_update_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.max_device_staleness_ms)
            .unwrap_or(false)
    }

    pub fn decide(
        &self,
        device: &DeviceSnapshot,
        measurement: &Measurement,
        target: &TargetState,
        timers: &ControlTimers,
        now_ms: u64,
    ) -> Action {
        let regime = self.desired_regime(measurement.temperature, target);
        let stale = self.is_device_stale(timers, now_ms);

        if device.equipment_status.regime() == Some(regime) && !stale {
            return Action::NoOp;
        }

        match regime {
            Regime::Cool => {
                let command = self.lower_cool(device);
                if command.cool_setpoint == device.cool_setpoint {
                    Action::NoOp
                } else {
                    Action::Cool(command)
                }
            }
            Regime::Heat => {
                let command = self.raise_heat(device);
                if command.heat_setpoint == device.heat_setpoint {
                    Action::NoOp
                } else {
                    Action::Heat(command)
                }
            }
            Regime::Idle => match device.equipment_status {
                EquipmentStatus::Cool => {
                    let command = self.release_cool(device);
                    if command.cool_setpoint == device.cool_setpoint {
                        Action::NoOp
                    } else {
                        Action::Idle(command)
                    }
                }
                EquipmentStatus::Heat => {
                    let command = self.release_heat(device);
                    if command.heat_setpoint == device.heat_setpoint {
                        Action::NoOp
                    } else {
                        Action::Idle(command)
                    }
                }
                EquipmentStatus::Idle | EquipmentStatus::Fan | EquipmentStatus::OverCool => {
                    Action::NoOp
                }
            },
        }
    }

    /// Rate limit. Returns the command only if the last one is old enough; a dropped
    /// action is not queued, the next tick re-evaluates from fresh state.
    pub fn command(
        &self,
        action: &Action,
        timers: &ControlTimers,
        now_ms: u64,
    ) -> Option<ModeCommand> {
        let command = action.command()?;
        if self.can_send_command(timers, now_ms) {
            Some(*command)
        } else {
            None
        }
    }

    pub fn can_send_command(&self, timers: &ControlTimers, now_ms: u64) -> bool {
        let window = self.config.max_thermostat_update_frequency_ms;
        timers
            .last_command_ms
            .map(|last| now_ms.saturating_sub(last) >= window)
            .unwrap_or(true)
    }

    fn lower_cool(&self, device: &DeviceSnapshot) -> ModeCommand {
        let cool = device.clamp_setpoint(device.temp_indoor - self.config.adjustment_increment);
        ModeCommand {
            mode: Mode::Cool,
            cool_setpoint: cool,
            heat_setpoint: cool - device.setpoint_delta,
        }
    }

    fn raise_heat(&self, device: &DeviceSnapshot) -> ModeCommand {
        let heat = device.clamp_setpoint(device.temp_indoor + self.config.adjustment_increment);
        ModeCommand {
            mode: Mode::Heat,
            heat_setpoint: heat,
            cool_setpoint: heat + device.setpoint_delta,
        }
    }

    fn release_cool(&self, device: &DeviceSnapshot) -> ModeCommand {
        let cool = device.clamp_setpoint(device.temp_indoor + self.config.adjustment_increment);
        ModeCommand {
            mode: Mode::Cool,
            cool_setpoint: cool,
            heat_setpoint: cool - device.setpoint_delta,
        }
    }

    fn release_heat(&self, device: &DeviceSnapshot) -> ModeCommand {
        let heat = device.clamp_setpoint(device.temp_indoor - self.config.adjustment_increment);
        ModeCommand {
            mode: Mode::Heat,
            heat_setpoint: heat,
            cool_setpoint: heat + device.setpoint_delta,
        }
    }
}

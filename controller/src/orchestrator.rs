use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use climate_common::{
    types::epoch_ms_to_datetime, Action, ControlEngine, ControlTimers, ControllerConfig,
    ControllerError, DeviceSnapshot, ErrorKind, GatewayError, Measurement, RunState,
    ScheduleConfig, TargetState, ThermostatInfo, ThermostatStatus,
};

use crate::{
    gateway::{DeviceGateway, SensorGateway, StatusPublisher},
    scheduler::{TaskKind, TaskScheduler},
    store::SetpointStore,
};

/// Everything the repeating tasks share. Lives behind a single mutex: a control tick
/// holds it from reading the snapshot until the command is applied.
#[derive(Debug, Default)]
pub struct ControllerState {
    pub device_id: Option<String>,
    pub device: Option<DeviceSnapshot>,
    pub initial_device: Option<DeviceSnapshot>,
    pub measurement: Option<Measurement>,
    pub timers: ControlTimers,
    pub running: bool,
    /// Set by an explicit `stop()`; a recovered sensor must not restart the controller.
    pub halted: bool,
    pub sensor_failures: u32,
}

struct Inner {
    engine: ControlEngine,
    schedule: ScheduleConfig,
    device: Arc<dyn DeviceGateway>,
    sensor: Arc<dyn SensorGateway>,
    publisher: Arc<dyn StatusPublisher>,
    store: SetpointStore,
    state: Mutex<ControllerState>,
    /// Held for the whole of start, restart and stop so they never interleave.
    lifecycle: Mutex<()>,
    tasks: TaskScheduler,
}

#[derive(Clone)]
pub struct Thermostat {
    inner: Arc<Inner>,
}

type BoxedStart<'a> = Pin<Box<dyn Future<Output = Result<(), ControllerError>> + Send + 'a>>;
type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

impl Thermostat {
    pub fn new(
        config: &ControllerConfig,
        store: SetpointStore,
        device: Arc<dyn DeviceGateway>,
        sensor: Arc<dyn SensorGateway>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        let mut schedule = config.schedule.clone();
        schedule.error_after_sensor_poll_failures =
            schedule.error_after_sensor_poll_failures.max(1);

        Self {
            inner: Arc::new(Inner {
                engine: ControlEngine::new(config.control.clone()),
                schedule,
                device,
                sensor,
                publisher,
                store,
                state: Mutex::new(ControllerState::default()),
                lifecycle: Mutex::new(()),
                tasks: TaskScheduler::new(),
            }),
        }
    }

    /// Resolves the device, primes measurement and snapshot, runs one evaluation and
    /// then schedules the repeating tasks. Safe to call again to re-initialize.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked(false).await
    }

    async fn start_locked(&self, refresh: bool) -> Result<(), ControllerError> {
        info!("starting thermostat controller");
        match self.initialize(refresh).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("initialization error: {err}");
                Err(match err.kind() {
                    ErrorKind::Initialization | ErrorKind::Validation | ErrorKind::Data => err,
                    ErrorKind::TransientGateway => ControllerError::Initialization(format!(
                        "Could not initialize: {}",
                        err.message()
                    )),
                })
            }
        }
    }

    /// Stops control and cancels every scheduled task. Waits for an in-flight start or
    /// restart, then takes the state lock, so a control tick already deciding finishes
    /// first and no later tick can apply.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let initial = {
            let mut state = self.inner.state.lock().await;
            state.running = false;
            state.halted = true;
            state.initial_device.clone()
        };
        self.inner.tasks.cancel_all();
        match initial {
            Some(device) => info!(
                initial_heat_setpoint = device.heat_setpoint,
                initial_cool_setpoint = device.cool_setpoint,
                initial_mode = device.mode.as_str(),
                "thermostat controller stopped"
            ),
            None => info!("thermostat controller stopped"),
        }
    }

    pub async fn status(&self) -> ThermostatInfo {
        let target = self.inner.store.load().await;
        let (cool_setpoint, heat_setpoint) = target.thresholds();
        let state = self.inner.state.lock().await;

        ThermostatInfo {
            status: ThermostatStatus::resolve(self.run_state_of(&state), state.device.as_ref()),
            device_id: state.device_id.clone(),
            sensor_temperature: state.measurement.map(|m| m.temperature),
            sensor_humidity: state.measurement.map(|m| m.humidity),
            target,
            cool_setpoint,
            heat_setpoint,
            thermostat_cool_setpoint: state.device.as_ref().map(|d| d.cool_setpoint),
            thermostat_heat_setpoint: state.device.as_ref().map(|d| d.heat_setpoint),
            lowest_temperature: state.device.as_ref().map(|d| d.setpoint_minimum),
            highest_temperature: state.device.as_ref().map(|d| d.setpoint_maximum),
            sensor_poll_failures: state.sensor_failures,
            device_updated_last: epoch_ms_to_datetime(state.timers.last_device_update_ms),
            thermostat_updated_last: epoch_ms_to_datetime(state.timers.last_command_ms),
            sensor_polled_last: epoch_ms_to_datetime(state.timers.last_sensor_poll_ms),
        }
    }

    #[cfg(test)]
    pub async fn run_state(&self) -> RunState {
        let state = self.inner.state.lock().await;
        self.run_state_of(&state)
    }

    fn run_state_of(&self, state: &ControllerState) -> RunState {
        RunState::derive(
            state.running,
            state.sensor_failures,
            self.inner.schedule.error_after_sensor_poll_failures,
        )
    }

    /// Validates against the current device limits and persists before answering.
    pub async fn update_targets(
        &self,
        target: TargetState,
    ) -> Result<ThermostatInfo, ControllerError> {
        let device = self.inner.state.lock().await.device.clone().ok_or_else(|| {
            ControllerError::Validation("Thermostat manager not ready".to_string())
        })?;

        target.validate_for(&device)?;
        self.inner.store.save(target).await?;
        info!(?target, "target state updated");

        Ok(self.status().await)
    }

    /// Scheduled sensor poll. A success after the failure threshold was reached
    /// re-runs the full start sequence, unless the controller was stopped explicitly.
    pub async fn poll_sensor(&self) -> Result<(), ControllerError> {
        let result = self.poll_sensor_once().await;
        if result.is_ok() && self.restart_pending().await {
            self.restart().await?;
        }
        result
    }

    /// Fetches a fresh snapshot regardless of run state. Errors go back to the caller.
    pub async fn refresh_device(&self) -> Result<(), ControllerError> {
        let device_id = self
            .inner
            .state
            .lock()
            .await
            .device_id
            .clone()
            .ok_or_else(|| ControllerError::Initialization("Could not find device".to_string()))?;

        debug!(%device_id, "refreshing device snapshot");
        let snapshot = self
            .call("get device", self.inner.device.get_device(&device_id))
            .await
            .map_err(|err| {
                error!(%device_id, "error updating thermostat: {err}");
                ControllerError::from(err)
            })?;

        let mut state = self.inner.state.lock().await;
        info!(
            %device_id,
            equipment = snapshot.equipment_status.as_str(),
            temp_indoor = snapshot.temp_indoor,
            "thermostat snapshot updated"
        );
        state.device = Some(snapshot);
        state.timers.last_device_update_ms = Some(now_ms());
        Ok(())
    }

    /// Scheduled control evaluation. No-op unless running.
    pub async fn control_tick(&self) -> Action {
        self.evaluate(true).await
    }

    pub async fn broadcast(&self) {
        let info = self.status().await;
        if let Err(err) = self.inner.publisher.publish(&info).await {
            warn!("status broadcast failed: {err}");
        }
    }

    async fn initialize(&self, refresh: bool) -> Result<(), ControllerError> {
        let devices = self
            .call("list devices", self.inner.device.list_devices())
            .await?;
        let device_id = devices
            .first()
            .map(|device| device.id.clone())
            .ok_or_else(|| ControllerError::Initialization("Could not find device".to_string()))?;
        info!(%device_id, "managing device");

        let (need_measurement, need_device) = {
            let mut state = self.inner.state.lock().await;
            if state.device_id.as_deref() != Some(device_id.as_str()) {
                state.device = None;
            }
            state.device_id = Some(device_id);
            (state.measurement.is_none(), refresh || state.device.is_none())
        };

        if need_measurement {
            if let Err(err) = self.poll_sensor_once().await {
                warn!("no initial measurement: {err}");
            }
        }
        if need_device {
            self.refresh_device().await.map_err(|err| {
                ControllerError::Initialization(format!(
                    "Could not fetch device snapshot: {}",
                    err.message()
                ))
            })?;
        }

        self.evaluate(false).await;

        {
            let mut state = self.inner.state.lock().await;
            state.initial_device = state.device.clone();
            state.sensor_failures = 0;
            state.running = true;
            state.halted = false;
        }
        self.schedule_tasks();
        Ok(())
    }

    /// Re-checks the trigger under the lifecycle lock: a `stop()` or another restart
    /// that won the race leaves nothing to do.
    fn restart(&self) -> BoxedStart<'_> {
        Box::pin(async move {
            let _lifecycle = self.inner.lifecycle.lock().await;
            if !self.restart_pending().await {
                return Ok(());
            }
            info!("sensor recovered after repeated failures, restarting controller");
            self.start_locked(true).await
        })
    }

    async fn restart_pending(&self) -> bool {
        let threshold = self.inner.schedule.error_after_sensor_poll_failures;
        let state = self.inner.state.lock().await;
        !state.halted && state.sensor_failures >= threshold
    }

    async fn poll_sensor_once(&self) -> Result<(), ControllerError> {
        let started = now_ms();
        let result = self
            .call("get measurement", self.inner.sensor.get_measurement())
            .await;
        let threshold = self.inner.schedule.error_after_sensor_poll_failures;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(mut measurement) => {
                let received = now_ms();
                measurement.received_at_ms = received;
                state.measurement = Some(measurement);
                state.timers.last_sensor_poll_ms = Some(started);
                state.timers.last_measurement_ms = Some(received);
                info!(
                    temperature = measurement.temperature,
                    humidity = measurement.humidity,
                    "received measurement"
                );
                Ok(())
            }
            Err(err) => {
                state.sensor_failures = state.sensor_failures.saturating_add(1);
                warn!(
                    failures = state.sensor_failures,
                    threshold, "error while polling sensor: {err}"
                );
                if state.sensor_failures >= threshold && state.running {
                    state.running = false;
                    error!(
                        failures = state.sensor_failures,
                        "too many consecutive sensor failures, stopping control"
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn evaluate(&self, require_running: bool) -> Action {
        let target = self.inner.store.load().await;
        let mut state = self.inner.state.lock().await;

        // stop() flips this under the same lock, so it cannot change before apply.
        if require_running && !state.running {
            debug!("controller not running, skipping evaluation");
            return Action::NoOp;
        }

        let (Some(device), Some(measurement)) = (state.device.clone(), state.measurement) else {
            warn!("not fully initialized, skipping evaluation");
            return Action::NoOp;
        };

        let now = now_ms();
        let engine = &self.inner.engine;
        let action = engine.decide(&device, &measurement, &target, &state.timers, now);
        debug!(
            temperature = measurement.temperature,
            equipment = device.equipment_status.as_str(),
            ?action,
            "evaluated control action"
        );

        if action.is_noop() {
            return action;
        }
        let Some(command) = engine.command(&action, &state.timers, now) else {
            info!(?action, "thermostat updated too recently, deferring");
            return action;
        };

        info!(device_id = %device.id, ?command, "updating thermostat mode");
        match self
            .call("apply mode", self.inner.device.apply_mode(&device.id, command))
            .await
        {
            Ok(()) => state.timers.last_command_ms = Some(now_ms()),
            Err(err) => error!(device_id = %device.id, "unable to update thermostat: {err}"),
        }
        action
    }

    fn schedule_tasks(&self) {
        let schedule = &self.inner.schedule;
        let tasks = &self.inner.tasks;

        tasks.ensure_scheduled(
            TaskKind::SensorPoll,
            Duration::from_millis(schedule.sensor_poll_interval_ms),
            self.job(|thermostat| async move {
                if let Err(err) = thermostat.poll_sensor().await {
                    debug!("sensor poll task: {err}");
                }
            }),
        );
        tasks.ensure_scheduled(
            TaskKind::DeviceRefresh,
            Duration::from_millis(schedule.device_refresh_interval_ms),
            self.job(|thermostat| async move {
                if let Err(err) = thermostat.refresh_device().await {
                    error!("exception during updating thermostat: {err}");
                }
            }),
        );
        tasks.ensure_scheduled(
            TaskKind::Control,
            Duration::from_millis(schedule.control_interval_ms),
            self.job(|thermostat| async move {
                thermostat.control_tick().await;
            }),
        );
        tasks.ensure_scheduled(
            TaskKind::Broadcast,
            Duration::from_millis(schedule.broadcast_interval_ms),
            self.job(|thermostat| async move {
                thermostat.broadcast().await;
            }),
        );
    }

    /// Wraps a task body so it holds only a weak reference; dropping the last
    /// [`Thermostat`] ends the tasks instead of leaking them.
    fn job<F, Fut>(&self, body: F) -> impl Fn() -> TaskFuture + Send + 'static
    where
        F: Fn(Thermostat) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let body = Arc::new(body);
        move || {
            let weak = weak.clone();
            let body = body.clone();
            let run: TaskFuture = Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    body(Thermostat { inner }).await;
                }
            });
            run
        }
    }

    async fn call<T, Fut>(&self, what: &str, fut: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let limit = Duration::from_millis(self.inner.schedule.gateway_timeout_ms);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transient(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().try_into().unwrap_or(0)
}

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{info, warn};

use climate_common::{ControllerError, StoredTargets, TargetState};

const STATE_FILE: &str = "thermostat-state.json";

/// Durable home of the user's target state. Every accepted update is on disk before
/// the caller sees success.
#[derive(Clone)]
pub struct SetpointStore {
    path: Arc<PathBuf>,
    current: Arc<Mutex<TargetState>>,
}

impl SetpointStore {
    pub async fn open(data_dir: &Path, defaults: TargetState) -> Result<Self, ControllerError> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|err| {
            warn!("unable to create data directory {}: {err}", data_dir.display());
            ControllerError::Initialization("Unable to create data directory".to_string())
        })?;

        let path = data_dir.join(STATE_FILE);
        let current = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let stored: StoredTargets = serde_json::from_slice(&raw).map_err(|err| {
                    ControllerError::Data(format!(
                        "unreadable state file {}: {err}",
                        path.display()
                    ))
                })?;
                let target = stored.resolve(defaults)?;
                info!(?target, "loaded target state from {}", path.display());
                target
            }
            Err(err) if err.kind() == ErrorKind::NotFound => defaults,
            Err(err) => {
                return Err(ControllerError::Initialization(format!(
                    "unable to read state file {}: {err}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path: Arc::new(path),
            current: Arc::new(Mutex::new(current)),
        })
    }

    pub async fn load(&self) -> TargetState {
        *self.current.lock().await
    }

    /// Writes a sibling temp file and renames it over the state file. The in-memory
    /// copy changes only after the rename succeeds.
    pub async fn save(&self, target: TargetState) -> Result<(), ControllerError> {
        let mut current = self.current.lock().await;
        let payload = serde_json::to_vec_pretty(&target)
            .map_err(|err| ControllerError::Data(format!("unable to encode targets: {err}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|err| io_error(&tmp, err))?;
        tokio::fs::rename(&tmp, self.path.as_ref())
            .await
            .map_err(|err| io_error(self.path.as_ref(), err))?;

        *current = target;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ControllerError {
    ControllerError::Initialization(format!("storage unavailable at {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use climate_common::ErrorKind as ControllerErrorKind;

    use super::*;

    const DEFAULTS: TargetState = TargetState::Setpoints {
        cool_setpoint: 24.0,
        heat_setpoint: 20.0,
    };

    #[tokio::test]
    async fn missing_file_uses_defaults_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");

        let store = SetpointStore::open(&data_dir, DEFAULTS).await.unwrap();

        assert_eq!(store.load().await, DEFAULTS);
        assert!(data_dir.is_dir());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn saved_targets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = SetpointStore::open(dir.path(), DEFAULTS).await.unwrap();
        let target = TargetState::Setpoints {
            cool_setpoint: 25.5,
            heat_setpoint: 19.0,
        };

        store.save(target).await.unwrap();
        let reopened = SetpointStore::open(dir.path(), DEFAULTS).await.unwrap();

        assert_eq!(reopened.load().await, target);
        assert!(!dir.path().join("thermostat-state.json.tmp").exists());
    }

    #[tokio::test]
    async fn partial_file_falls_back_per_field() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), r#"{"heatSetpoint": 18.5}"#).unwrap();

        let store = SetpointStore::open(dir.path(), DEFAULTS).await.unwrap();

        assert_eq!(
            store.load().await,
            TargetState::Setpoints {
                cool_setpoint: 24.0,
                heat_setpoint: 18.5
            }
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();

        let err = SetpointStore::open(dir.path(), DEFAULTS)
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ControllerErrorKind::Data);
    }
}

use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SensorPoll,
    DeviceRefresh,
    Control,
    Broadcast,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorPoll => "sensor-poll",
            Self::DeviceRefresh => "device-refresh",
            Self::Control => "control",
            Self::Broadcast => "broadcast",
        }
    }
}

/// One repeating tokio task per [`TaskKind`].
#[derive(Default)]
pub struct TaskScheduler {
    handles: Mutex<HashMap<TaskKind, JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `job` every `period`, first run one period from now. Returns false and
    /// leaves the running task untouched if `kind` is already scheduled.
    pub fn ensure_scheduled<F, Fut>(&self, kind: TaskKind, period: Duration, job: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.get(&kind).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let period = period.max(Duration::from_millis(1));
        info!(task = kind.as_str(), ?period, "scheduling task");
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                job().await;
            }
        });
        handles.insert(kind, handle);
        true
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, kind: TaskKind) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (kind, handle) in drained {
            info!(task = kind.as_str(), "cancelling task");
            handle.abort();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn scheduling_twice_keeps_one_task() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let first =
            scheduler.ensure_scheduled(TaskKind::Control, Duration::from_millis(10), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        let second =
            scheduler.ensure_scheduled(TaskKind::Control, Duration::from_millis(10), || async {});

        assert!(first);
        assert!(!second);
        assert!(scheduler.is_scheduled(TaskKind::Control));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancelled_task_stops_running_and_can_be_rescheduled() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        scheduler.ensure_scheduled(TaskKind::SensorPoll, Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.cancel_all();
        assert!(!scheduler.is_scheduled(TaskKind::SensorPoll));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let frozen = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), frozen);

        let rescheduled =
            scheduler.ensure_scheduled(TaskKind::SensorPoll, Duration::from_millis(5), || async {});
        assert!(rescheduled);
    }
}

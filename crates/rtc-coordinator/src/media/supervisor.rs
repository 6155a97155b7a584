//! Media worker supervision.
//!
//! The worker is owned by the supervisor rather than a process global. When it
//! dies the configured [`WorkerRestartPolicy`] decides between terminating the
//! process (the default; an external supervisor restarts the coordinator) and
//! relaunching the worker in-process. On relaunch every room living on the dead
//! worker is closed and its peers receive `room-closed`.

use super::{MediaEngine, MediaError};
use crate::actors::RoomRegistryHandle;
use crate::config::WorkerRestartPolicy;
use crate::observability::metrics;
use crate::observability::HealthState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Delay between worker death and process exit, so logs and metrics flush.
pub const WORKER_DEATH_EXIT_DELAY: Duration = Duration::from_secs(2);

/// Creates fresh media workers.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn MediaEngine>, MediaError>;
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The worker is gone for good; the process must exit.
    Fatal,
    /// Shutdown was requested.
    Cancelled,
}

/// Watches the media worker and applies the restart policy.
pub struct WorkerSupervisor {
    policy: WorkerRestartPolicy,
    launcher: Arc<dyn EngineLauncher>,
    registry: RoomRegistryHandle,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
}

impl WorkerSupervisor {
    #[must_use]
    pub fn new(
        policy: WorkerRestartPolicy,
        launcher: Arc<dyn EngineLauncher>,
        registry: RoomRegistryHandle,
        health: Arc<HealthState>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            policy,
            launcher,
            registry,
            health,
            cancel_token,
        }
    }

    /// Supervise `engine` until shutdown or an unrecoverable worker death.
    #[instrument(skip_all, name = "rtc.media.supervisor")]
    pub async fn run(self, mut engine: Arc<dyn MediaEngine>) -> SupervisorOutcome {
        let mut restarts: u32 = 0;
        self.health.set_media_ready(engine.is_alive());

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "rtc.media", "Worker supervisor cancelled");
                    return SupervisorOutcome::Cancelled;
                }
                () = engine.worker_died() => {}
            }

            metrics::record_media_worker_death();
            self.health.set_media_ready(false);

            let max_restarts = match self.policy {
                WorkerRestartPolicy::Exit => {
                    error!(
                        target: "rtc.media",
                        "Media worker died, exiting"
                    );
                    return SupervisorOutcome::Fatal;
                }
                WorkerRestartPolicy::Restart { max_restarts } => max_restarts,
            };

            if restarts >= max_restarts {
                error!(
                    target: "rtc.media",
                    restarts,
                    max_restarts,
                    "Media worker died and restart budget is exhausted, exiting"
                );
                return SupervisorOutcome::Fatal;
            }
            restarts += 1;

            warn!(
                target: "rtc.media",
                attempt = restarts,
                max_restarts,
                "Media worker died, relaunching"
            );

            let fresh = match self.launcher.launch().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    error!(target: "rtc.media", error = %e, "Media worker relaunch failed");
                    return SupervisorOutcome::Fatal;
                }
            };

            if let Err(e) = self.registry.replace_engine(Arc::clone(&fresh)).await {
                error!(
                    target: "rtc.media",
                    error = %e,
                    "Failed to hand relaunched worker to room registry"
                );
                return SupervisorOutcome::Fatal;
            }

            self.health.set_media_ready(fresh.is_alive());
            engine = fresh;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, RoomSettings};
    use crate::media::LocalMediaEngine;
    use std::sync::Mutex;

    /// Hands out pre-built engines so the test can kill them.
    struct QueueLauncher {
        engines: Mutex<Vec<LocalMediaEngine>>,
    }

    #[async_trait]
    impl EngineLauncher for QueueLauncher {
        async fn launch(&self) -> Result<Arc<dyn MediaEngine>, MediaError> {
            let engine = self
                .engines
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| MediaError::Engine("no engines left".to_string()))?;
            Ok(Arc::new(engine))
        }
    }

    fn registry(engine: Arc<dyn MediaEngine>) -> RoomRegistryHandle {
        RoomRegistryHandle::new(
            "rtc-test".to_string(),
            engine,
            RoomSettings::default(),
            ActorMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_exit_policy_is_fatal_on_death() {
        let engine = LocalMediaEngine::new(10000, 10100);
        let registry = registry(Arc::new(engine.clone()));
        let health = Arc::new(HealthState::new());

        let supervisor = WorkerSupervisor::new(
            WorkerRestartPolicy::Exit,
            Arc::new(QueueLauncher {
                engines: Mutex::new(Vec::new()),
            }),
            registry.clone(),
            Arc::clone(&health),
            CancellationToken::new(),
        );

        let task = tokio::spawn(supervisor.run(Arc::new(engine.clone())));
        tokio::task::yield_now().await;
        engine.kill_worker();

        assert_eq!(task.await.unwrap(), SupervisorOutcome::Fatal);
        assert!(!health.is_ready());
        registry.cancel();
    }

    #[tokio::test]
    async fn test_restart_policy_relaunches_until_budget() {
        let first = LocalMediaEngine::new(10000, 10100);
        let second = LocalMediaEngine::new(10000, 10100);
        let registry = registry(Arc::new(first.clone()));
        let health = Arc::new(HealthState::new());

        let supervisor = WorkerSupervisor::new(
            WorkerRestartPolicy::Restart { max_restarts: 1 },
            Arc::new(QueueLauncher {
                engines: Mutex::new(vec![second.clone()]),
            }),
            registry.clone(),
            Arc::clone(&health),
            CancellationToken::new(),
        );

        let task = tokio::spawn(supervisor.run(Arc::new(first.clone())));
        tokio::task::yield_now().await;

        first.kill_worker();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished(), "first death is within budget");

        second.kill_worker();
        assert_eq!(task.await.unwrap(), SupervisorOutcome::Fatal);
        registry.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_stops_supervisor() {
        let engine = LocalMediaEngine::new(10000, 10100);
        let registry = registry(Arc::new(engine.clone()));
        let token = CancellationToken::new();

        let supervisor = WorkerSupervisor::new(
            WorkerRestartPolicy::Exit,
            Arc::new(QueueLauncher {
                engines: Mutex::new(Vec::new()),
            }),
            registry.clone(),
            Arc::new(HealthState::new()),
            token.clone(),
        );

        let task = tokio::spawn(supervisor.run(Arc::new(engine)));
        token.cancel();

        assert_eq!(task.await.unwrap(), SupervisorOutcome::Cancelled);
        registry.cancel();
    }
}

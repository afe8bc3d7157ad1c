use crate::{CycleReport, Error, Pipeline, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What to do when the session role is rejected before the first poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFailurePolicy {
    /// Stop the scheduler before it enters the loop
    #[default]
    Abort,
    /// Log it and keep polling; every cycle fails until the role is fixed
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub role_failure: RoleFailurePolicy,

    /// Stop after this many cycles; run until cancelled when unset
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

fn default_interval_secs() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            role_failure: RoleFailurePolicy::default(),
            max_cycles: None,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Polling,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub last_error: Option<String>,
    pub last_report: Option<CycleReport>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            cycles: 0,
            failed_cycles: 0,
            last_error: None,
            last_report: None,
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    pending: Mutex<Option<Pipeline>>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    cancel: CancellationToken,
    status: Arc<RwLock<SchedulerStatus>>,
}

/// Drives a [`Pipeline`] on a fixed interval in one background task.
///
/// `start` may be called any number of times; only the first call spawns
/// the loop.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PollScheduler {
    pub fn new(pipeline: Pipeline, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pending: Mutex::new(Some(pipeline)),
                task: Mutex::new(None),
                cancel: CancellationToken::new(),
                status: Arc::new(RwLock::new(SchedulerStatus::default())),
            }),
        }
    }

    /// Spawn the poll loop unless it was already spawned. Returns whether
    /// this call started it. Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let Some(pipeline) = lock(&self.inner.pending).take() else {
            debug!("Poll scheduler already started");
            return false;
        };

        let handle = tokio::spawn(run(
            pipeline,
            self.inner.config.clone(),
            self.inner.cancel.clone(),
            self.inner.status.clone(),
        ));
        *lock(&self.inner.task) = Some(handle);
        true
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.pending).is_none()
    }

    /// Token that stops the loop between cycles when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.inner.status.read().await.clone()
    }

    /// Wait for the loop to finish and return its result
    pub async fn wait(&self) -> Result<()> {
        let handle = lock(&self.inner.task).take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Generic(anyhow::anyhow!("poll task panicked: {}", e)))?,
            None => Ok(()),
        }
    }

    /// Stop after the cycle in flight (if any) and wait for the loop to exit
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cancel.cancel();
        self.wait().await
    }
}

async fn run(
    mut pipeline: Pipeline,
    config: SchedulerConfig,
    cancel: CancellationToken,
    status: Arc<RwLock<SchedulerStatus>>,
) -> Result<()> {
    info!(
        "[{}] Starting poll scheduler for {} every {}s",
        pipeline.name(),
        pipeline.station(),
        config.interval().as_secs()
    );

    if let Err(e) = preflight(&mut pipeline, &config).await {
        error!(kind = e.kind(), "[{}] Cannot start polling: {}", pipeline.name(), e);
        status.write().await.state = SchedulerState::Failed(e.to_string());
        return Err(e);
    }

    // First tick completes immediately, so the first cycle runs right away.
    let mut interval = tokio::time::interval(config.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("[{}] Received stop signal", pipeline.name());
                break;
            }
            _ = interval.tick() => {}
        }

        status.write().await.state = SchedulerState::Polling;

        let span = info_span!(
            "poll_cycle",
            pipeline = %pipeline.name(),
            cycle_id = %Uuid::now_v7()
        );
        let outcome = pipeline.poll_once().instrument(span.clone()).await;

        {
            let mut s = status.write().await;
            s.cycles += 1;
            s.state = SchedulerState::Idle;
            match outcome {
                Ok(report) => {
                    if report.forwarded > 0 {
                        span.in_scope(|| {
                            info!(
                                fetched = report.fetched,
                                forwarded = report.forwarded,
                                skipped = report.skipped,
                                "Poll cycle forwarded transactions"
                            )
                        });
                    } else {
                        span.in_scope(|| debug!(fetched = report.fetched, "Poll cycle idle"));
                    }
                    s.last_report = Some(report);
                }
                Err(e) => {
                    span.in_scope(|| error!(kind = e.kind(), "Poll cycle failed: {}", e));
                    s.failed_cycles += 1;
                    s.last_error = Some(e.to_string());
                }
            }
        }

        cycles += 1;
        if config.max_cycles.is_some_and(|max| cycles >= max) {
            debug!("[{}] Reached {} cycles", pipeline.name(), cycles);
            break;
        }
    }

    if let Err(e) = pipeline.disconnect().await {
        warn!("[{}] Error while disconnecting: {}", pipeline.name(), e);
    }

    status.write().await.state = SchedulerState::Stopped;
    info!("[{}] Poll scheduler stopped", pipeline.name());
    Ok(())
}

/// Connect once before the loop so configuration mistakes stop the process
/// here instead of failing every cycle.
async fn preflight(pipeline: &mut Pipeline, config: &SchedulerConfig) -> Result<()> {
    match pipeline.connect().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(Error::Authorization(msg)) if config.role_failure == RoleFailurePolicy::Abort => {
            Err(Error::Authorization(msg))
        }
        Err(e) => {
            warn!(
                kind = e.kind(),
                "[{}] Initial connect failed, polling anyway: {}",
                pipeline.name(),
                e
            );
            Ok(())
        }
    }
}

//! Anchor Scheduler
//!
//! Background service that produces one anchor per closed window. The next
//! wake-up is recomputed from the wall clock on every iteration as an
//! absolute window boundary, so missed ticks and clock adjustments never
//! accumulate drift. A wake also re-checks a few earlier windows, which
//! makes missed windows retriable; re-anchoring an anchored window is a
//! no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::anchor::model::{AnchorOutcome, AnchorWindow};
use crate::anchor::service::{AnchorService, BuiltAnchor};
use crate::config::AnchorConfig;
use crate::error::EvidenceError;
use crate::ots::WitnessPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Collecting,
    Building,
    Persisting,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: SchedulerState,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_anchor: Option<AnchorOutcome>,
    pub last_error: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            running: false,
            state: SchedulerState::Idle,
            next_run: None,
            last_run: None,
            last_anchor: None,
            last_error: None,
        }
    }
}

/// Read-only view of a scheduler's status, shareable with request handlers.
#[derive(Clone, Default)]
pub struct SchedulerHandle {
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerHandle {
    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    pub async fn state(&self) -> SchedulerState {
        self.status.read().await.state
    }

    async fn set_state(&self, state: SchedulerState) {
        self.status.write().await.state = state;
    }
}

/// First instant after `now` at which a new window opens.
pub fn next_boundary(
    now: DateTime<Utc>,
    period: chrono::Duration,
) -> Result<DateTime<Utc>, EvidenceError> {
    Ok(AnchorWindow::containing(now, period)?.end)
}

/// Closed windows due at `now`, oldest first: the most recent closed window
/// plus `catch_up` windows before it.
pub fn due_windows(
    now: DateTime<Utc>,
    period: chrono::Duration,
    catch_up: u32,
) -> Result<Vec<AnchorWindow>, EvidenceError> {
    let mut window = AnchorWindow::containing(now, period)?.previous();
    let mut windows = vec![window];
    for _ in 0..catch_up {
        window = window.previous();
        windows.push(window);
    }
    windows.reverse();
    Ok(windows)
}

#[derive(Clone)]
struct Worker {
    service: AnchorService,
    publisher: Option<WitnessPublisher>,
    config: AnchorConfig,
    handle: SchedulerHandle,
}

impl Worker {
    async fn run_due(&self, now: DateTime<Utc>) -> Vec<Result<AnchorOutcome, EvidenceError>> {
        let windows = match due_windows(now, self.config.period(), self.config.catch_up_windows) {
            Ok(windows) => windows,
            Err(e) => {
                error!("Cannot compute anchor windows: {}", e);
                self.handle.status.write().await.last_error = Some(e.to_string());
                return vec![Err(e)];
            }
        };

        let mut results = Vec::with_capacity(windows.len());
        for window in windows {
            let result = self.run_window(window, now).await;
            {
                let mut status = self.handle.status.write().await;
                status.state = SchedulerState::Idle;
                status.last_run = Some(now);
                match &result {
                    Ok(outcome) => {
                        if outcome.created {
                            status.last_anchor = Some(outcome.clone());
                        }
                    }
                    Err(e) => status.last_error = Some(format!("{}: {}", window, e)),
                }
            }
            if let Err(e) = &result {
                error!("Anchoring window {} failed: {}", window, e);
            }
            results.push(result);
        }
        results
    }

    /// Collecting, Building, Persisting, then back to Idle.
    async fn run_window(
        &self,
        window: AnchorWindow,
        now: DateTime<Utc>,
    ) -> Result<AnchorOutcome, EvidenceError> {
        self.handle.set_state(SchedulerState::Collecting).await;
        let events = self.service.collect(&window, now).await?;

        self.handle.set_state(SchedulerState::Building).await;
        let built = BuiltAnchor::from_events(window, &events);

        self.handle.set_state(SchedulerState::Persisting).await;
        let outcome = self.service.persist(built).await?;

        if outcome.created {
            info!(
                "Anchored window {}: {} events, root {}",
                window, outcome.event_count, outcome.merkle_root
            );
            if let Some(publisher) = &self.publisher {
                publisher.spawn_attest(outcome.clone());
            }
        } else {
            debug!("Window {} already anchored", window);
        }
        Ok(outcome)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.run_due(Utc::now()).await;

        loop {
            let now = Utc::now();
            let next = match next_boundary(now, self.config.period()) {
                Ok(next) => next,
                Err(e) => {
                    error!("Anchor scheduler stopping: {}", e);
                    break;
                }
            };
            self.handle.status.write().await.next_run = Some(next);

            let wait = (next - now).to_std().unwrap_or_default() + self.config.settle_delay();
            debug!("Next anchor run at {} (in {:?})", next, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    // Sender dropped: the owning scheduler is gone.
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            self.run_due(Utc::now()).await;
        }

        let mut status = self.handle.status.write().await;
        status.running = false;
        status.next_run = None;
        info!("Anchor scheduler stopped");
    }
}

/// Owns the background anchoring task. Constructed once by the process
/// entry point; `start` and `stop` bound its lifetime.
pub struct AnchorScheduler {
    worker: Worker,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl AnchorScheduler {
    pub fn new(
        service: AnchorService,
        publisher: Option<WitnessPublisher>,
        config: AnchorConfig,
    ) -> Self {
        Self {
            worker: Worker {
                service,
                publisher,
                config,
                handle: SchedulerHandle::default(),
            },
            shutdown: None,
            task: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.worker.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn start(&mut self) -> Result<(), EvidenceError> {
        if self.is_running() {
            return Err(EvidenceError::SchedulerAlreadyRunning);
        }
        // Validate the period up front rather than inside the task.
        next_boundary(Utc::now(), self.worker.config.period())?;

        let (tx, rx) = watch::channel(false);
        self.worker.handle.status.write().await.running = true;
        let worker = self.worker.clone();
        self.task = Some(tokio::spawn(worker.run(rx)));
        self.shutdown = Some(tx);

        info!(
            "Anchor scheduler started (period {}s, {} catch-up windows)",
            self.worker.config.period_secs, self.worker.config.catch_up_windows
        );
        Ok(())
    }

    /// Signal shutdown and wait for the loop to exit. An anchor being built
    /// when the signal arrives is finished first.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Anchor scheduler task failed: {}", e);
            }
        }
        self.worker.handle.status.write().await.running = false;
    }

    /// Anchor every window due at `now` once, outside the background loop.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Vec<Result<AnchorOutcome, EvidenceError>> {
        self.worker.run_due(now).await
    }
}

//! Periodic and on-demand reconciliation

use crate::error::{Result, SyncError};
use crate::reconciler::{Reconciler, SyncReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the periodic sync task.
///
/// [`start`](Self::start) runs a pass immediately and then once per
/// interval. Manual [`trigger`](Self::trigger) calls go through the same
/// [`Reconciler`], so they never overlap a scheduled pass.
pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval: interval.max(Duration::from_secs(1)),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SyncError::SchedulerStarted);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let reconciler = self.reconciler.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::run_scheduled(&reconciler).await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Sync scheduler loop exited");
        });

        info!(interval = ?period, "Sync scheduler started");
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Signal the loop and wait for it. A pass in flight is finished first.
    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!("Sync scheduler task failed: {}", e);
        }
        info!("Sync scheduler stopped");
    }

    /// Run one pass now.
    pub async fn trigger(&self) -> Result<SyncReport> {
        self.reconciler.run().await
    }

    async fn run_scheduled(reconciler: &Reconciler) {
        match reconciler.run().await {
            Ok(report) => debug!(has_changes = report.has_changes, "Scheduled sync finished"),
            Err(SyncError::AlreadyRunning) => debug!("Skipping scheduled sync, a pass is in flight"),
            Err(e) => error!("Scheduled sync failed: {}", e),
        }
    }
}

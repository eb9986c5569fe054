//! Timer-driven cycle loop. A single task runs every cycle, so cycles never
//! overlap; ticks missed while a cycle runs are skipped, and extra triggers
//! collapse into at most one pending request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::CycleRunner;

/// Cloneable way to request an early cycle.
#[derive(Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

impl Trigger {
    /// Ask for a cycle ahead of the timer. Returns false when a request is
    /// already pending (this one is merged into it) or the loop has stopped.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("scheduler: trigger already pending; merged");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Controls a running scheduler. Dropping it stops the loop.
pub struct SchedulerHandle {
    trigger: Trigger,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn trigger(&self) -> bool { self.trigger.fire() }

    pub fn trigger_handle(&self) -> Trigger { self.trigger.clone() }

    /// Stop the loop after any in-flight cycle completes.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Run `runner` now and then every `cadence`.
pub fn spawn_scheduler(runner: Arc<CycleRunner>, cadence: Duration) -> SchedulerHandle {
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(cadence_secs = cadence.as_secs(), "scheduler started");
        loop {
            let reason = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => "tick",
                Some(()) = trigger_rx.recv() => "trigger",
            };
            debug!(reason, "scheduler: running cycle");
            if let Err(e) = runner.run_cycle().await {
                // No immediate retry: the next tick or trigger gets another go.
                warn!(reason, error = %e, "scheduler: cycle did not publish");
            }
        }
        info!("scheduler stopped");
    });

    SchedulerHandle { trigger: Trigger { tx: trigger_tx }, stop_tx: Some(stop_tx), task: Some(task) }
}

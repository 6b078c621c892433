//! Background health monitor

use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ManagerInner;
use super::types::HealthTrigger;

/// Running monitor task
pub(super) struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(super) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the task to finish
    pub(super) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "health monitor task panicked");
            }
        }
    }
}

/// Spawn the interval task
///
/// The task holds only a weak reference so a dropped manager is not kept alive.
pub(super) fn spawn(inner: &Arc<ManagerInner>) -> MonitorHandle {
    let token = CancellationToken::new();
    let period = inner.config.health_check_interval;
    let weak: Weak<ManagerInner> = Arc::downgrade(inner);
    let cancelled = token.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval = ?period, "health monitor started");

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = inner.evaluate_locked(HealthTrigger::Proactive) => {}
            }
        }

        tracing::debug!("health monitor stopped");
    });

    MonitorHandle { token, task }
}

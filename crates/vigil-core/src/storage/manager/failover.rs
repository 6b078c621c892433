//! Health evaluation and backend switching
//!
//! One evaluation walks the rules in order:
//! 1. not on the primary and the primary passes: switch to it
//! 2. the current backend passes: keep it
//! 3. not on the fallback and the fallback passes: switch to it
//! 4. otherwise: nothing is serving
//!
//! Evaluations always run under `failover_lock`.

use chrono::Utc;

use super::ManagerInner;
use super::observer::Transition;
use super::types::{BackendRole, BackendStatus, HealthTrigger};
use crate::error::StorageError;

impl ManagerInner {
    /// Check one backend: connect if needed, then run its health check, all under the health timeout
    pub(super) async fn check_backend(&self, role: BackendRole) -> bool {
        let Some(backend) = self.backend(role) else {
            return false;
        };
        let timeout = self.config.health_check_timeout;

        let outcome = tokio::time::timeout(timeout, async {
            backend.connect().await?;
            if backend.health_check().await {
                Ok::<(), StorageError>(())
            } else {
                Err(StorageError::unavailable(
                    backend.kind().as_str(),
                    "health check failed",
                ))
            }
        })
        .await
        .unwrap_or_else(|_| Err(StorageError::timeout(backend.kind().as_str(), timeout)));

        let passed = outcome.is_ok();
        let error = outcome.err().map(|e| e.to_string());
        if let Some(error) = &error {
            tracing::debug!(role = %role, backend = %backend.kind(), error = %error, "health check failed");
        }
        self.health.write().get_mut(role).record_check(passed, error);
        passed
    }

    /// Walk the failover rules once; the caller holds `failover_lock`
    pub(super) async fn evaluate(&self, trigger: HealthTrigger) {
        let current = self.active_role();

        if current != Some(BackendRole::Primary)
            && self.primary_in_play()
            && self.check_backend(BackendRole::Primary).await
        {
            self.switch_to(Some(BackendRole::Primary), current, trigger)
                .await;
            return;
        }

        if let Some(role) = current {
            if self.check_backend(role).await {
                return;
            }
        }

        if current != Some(BackendRole::Fallback)
            && self.fallback_in_play()
            && self.check_backend(BackendRole::Fallback).await
        {
            self.switch_to(Some(BackendRole::Fallback), current, trigger)
                .await;
            return;
        }

        if current.is_some() {
            self.switch_to(None, current, trigger).await;
        }
    }

    /// Take the failover lock and evaluate
    pub(super) async fn evaluate_locked(&self, trigger: HealthTrigger) {
        let _guard = self.failover_lock.lock().await;
        self.evaluate(trigger).await;
    }

    /// Evaluate after an operation failed on the backend seen at `generation`
    ///
    /// Returns true when the active backend changed since then, either by
    /// this call or by a concurrent one that got the lock first.
    pub(super) async fn reactive_check(&self, generation: u64) -> bool {
        let _guard = self.failover_lock.lock().await;
        if self.generation() != generation {
            return true;
        }
        self.evaluate(HealthTrigger::Reactive).await;
        self.generation() != generation
    }

    /// Make `to` active; `to` has already passed a health check
    ///
    /// The previous backend is disconnected only after the switch is published.
    async fn switch_to(
        &self,
        to: Option<BackendRole>,
        from: Option<BackendRole>,
        trigger: HealthTrigger,
    ) {
        if let Some(role) = to {
            self.breaker(role).reset();
            if self.config.migrations.auto_migrate {
                if let Err(e) = self.migrate_role(role).await {
                    tracing::error!(role = %role, error = %e, "migrations failed on new active backend");
                }
            }
        }

        self.transition(to, trigger);

        if let Some(old) = from.filter(|old| Some(*old) != to) {
            if let Some(backend) = self.backend(old) {
                if let Err(e) = backend.disconnect().await {
                    tracing::warn!(role = %old, backend = %backend.kind(), error = %e, "disconnect failed");
                }
            }
        }
    }

    /// Publish a new active backend and notify observers
    pub(super) fn transition(&self, to: Option<BackendRole>, trigger: HealthTrigger) {
        let to_status = match to {
            Some(role) => self.designated_status(role),
            None => BackendStatus::Failed,
        };
        let to_kind = to.and_then(|role| self.backend(role)).map(|b| b.kind());
        let now = Utc::now();

        let (from_role, from_status) = {
            let mut state = self.state.write();
            let previous = (state.role, state.status);
            state.role = to;
            state.status = to_status;
            state.generation += 1;
            previous
        };

        {
            let mut stats = self.stats.lock();
            stats.status = to_status;
            stats.active_backend = to_kind;
            stats.status_since = Some(now);
            if trigger != HealthTrigger::Startup && trigger != HealthTrigger::Shutdown {
                match to {
                    Some(BackendRole::Primary) if from_role != Some(BackendRole::Primary) => {
                        stats.recoveries += 1
                    }
                    _ if from_role.is_some() && from_role != to => stats.failovers += 1,
                    _ => {}
                }
            }
        }

        let backend = to_kind.map(|k| k.as_str()).unwrap_or("none");
        match (trigger, to_status) {
            (HealthTrigger::Shutdown, _) => {}
            (_, BackendStatus::Healthy) => tracing::info!(
                backend,
                from = %from_status,
                trigger = trigger.as_str(),
                "storage healthy"
            ),
            (_, BackendStatus::Degraded) => tracing::warn!(
                backend,
                from = %from_status,
                trigger = trigger.as_str(),
                "storage degraded, serving from fallback"
            ),
            (_, BackendStatus::Failed) => tracing::error!(
                from = %from_status,
                trigger = trigger.as_str(),
                "no storage backend available"
            ),
        }

        self.observer.on_transition(&Transition {
            from: from_status,
            to: to_status,
            backend: to_kind,
            trigger,
        });
    }
}

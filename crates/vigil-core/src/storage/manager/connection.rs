//! Initial backend selection per fallback strategy

use super::ManagerInner;
use super::types::{BackendRole, HealthTrigger};
use crate::config::FallbackStrategy;
use crate::error::{StorageError, StorageResult};

impl ManagerInner {
    /// Pick the first active backend; only `FailFast` turns a connect failure into an error
    pub(super) async fn establish(&self) -> StorageResult<()> {
        let chosen = match self.config.fallback_strategy {
            FallbackStrategy::FallbackOnly => self.connect_fallback().await,
            FallbackStrategy::FailFast => {
                self.connect_role(BackendRole::Primary).await?;
                Some(BackendRole::Primary)
            }
            FallbackStrategy::AutoFallback => {
                if self.primary_in_play() {
                    match self.connect_role(BackendRole::Primary).await {
                        Ok(()) => Some(BackendRole::Primary),
                        Err(e) => {
                            tracing::warn!(error = %e, "primary connection failed, falling back");
                            self.connect_fallback().await
                        }
                    }
                } else {
                    self.connect_fallback().await
                }
            }
            FallbackStrategy::RetryThenFallback => {
                match self.connect_primary_with_retry().await {
                    Ok(()) => Some(BackendRole::Primary),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "primary connection failed after retries, falling back"
                        );
                        self.connect_fallback().await
                    }
                }
            }
        };

        self.transition(chosen, HealthTrigger::Startup);
        Ok(())
    }

    async fn connect_role(&self, role: BackendRole) -> StorageResult<()> {
        let backend = self.backend(role).ok_or_else(|| {
            StorageError::config(format!("no {} backend configured", role))
        })?;

        tracing::info!(role = %role, backend = %backend.kind(), "connecting");
        let result = backend.connect().await;

        let error = result.as_ref().err().map(|e| e.to_string());
        self.health
            .write()
            .get_mut(role)
            .record_check(result.is_ok(), error);
        result
    }

    async fn connect_primary_with_retry(&self) -> StorageResult<()> {
        self.retry
            .execute(|| self.connect_role(BackendRole::Primary), None)
            .await
            .into_result()
    }

    async fn connect_fallback(&self) -> Option<BackendRole> {
        if !self.fallback_in_play() {
            return None;
        }
        match self.connect_role(BackendRole::Fallback).await {
            Ok(()) => Some(BackendRole::Fallback),
            Err(e) => {
                tracing::error!(error = %e, "fallback connection failed");
                None
            }
        }
    }
}

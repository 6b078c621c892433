//! Migration runner: discover, verify, plan, apply, record

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use super::discovery::discover;
use super::lock;
use super::types::{AppliedMigration, Migration, MigrationReport, MigrationState, MigrationStatus};
use crate::error::{StorageError, StorageResult};
use crate::storage::{BackendKind, StorageBackend};

/// Applies the scripts under one migration root
///
/// Each backend reads its own subtree (`<root>/postgres`, `<root>/sqlite`)
/// and keeps its own history rows.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    root: PathBuf,
}

impl MigrationManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scripts on disk for `kind`, ordered by version
    pub fn discover(&self, kind: BackendKind) -> StorageResult<Vec<Migration>> {
        discover(&self.root, kind)
    }

    /// Apply pending migrations up to `target` (inclusive), stopping at the first failure
    ///
    /// Every applied script is verified against its recorded checksum before
    /// anything new runs. The plan is computed only once the locks are held,
    /// so a concurrent runner that finished first leaves nothing to do.
    pub async fn migrate(
        &self,
        backend: &dyn StorageBackend,
        target: Option<&str>,
    ) -> StorageResult<MigrationReport> {
        if let Some(target) = target {
            validate_target(target)?;
        }
        let kind = backend.kind();
        let discovered = self.discover(kind)?;

        let key = self.lock_key(kind);
        let _local = lock::acquire(&key).await;
        let advisory = backend.acquire_migration_lock(&key).await?;

        let result = self.migrate_locked(backend, &discovered, target).await;

        if let Some(advisory) = advisory {
            if let Err(e) = advisory.release().await {
                tracing::warn!(backend = %kind, error = %e, "failed to release migration lock");
            }
        }
        result
    }

    async fn migrate_locked(
        &self,
        backend: &dyn StorageBackend,
        discovered: &[Migration],
        target: Option<&str>,
    ) -> StorageResult<MigrationReport> {
        let kind = backend.kind();
        backend.ensure_history_table().await?;
        let applied = backend.applied_migrations().await?;
        verify(discovered, &applied, &self.root, kind)?;

        let (pending, skipped) = plan(discovered, &applied, target);
        let mut report = MigrationReport {
            applied: Vec::with_capacity(pending.len()),
            already_applied: applied.len(),
            skipped,
        };

        if pending.is_empty() {
            tracing::info!(backend = %kind, applied = applied.len(), "schema is up to date");
            return Ok(report);
        }

        for migration in pending {
            tracing::info!(
                backend = %kind,
                version = %migration.version,
                name = %migration.name,
                "applying migration"
            );
            let record = backend.apply_migration(migration).await.map_err(|e| {
                tracing::error!(
                    backend = %kind,
                    version = %migration.version,
                    error = %e,
                    "migration failed, halting"
                );
                e
            })?;
            tracing::debug!(
                version = %record.version,
                elapsed = ?record.execution_time,
                "migration recorded"
            );
            report.applied.push(record);
        }

        Ok(report)
    }

    /// Check applied scripts against disk without applying anything
    pub async fn verify(&self, backend: &dyn StorageBackend) -> StorageResult<()> {
        let kind = backend.kind();
        let discovered = self.discover(kind)?;
        backend.ensure_history_table().await?;
        let applied = backend.applied_migrations().await?;
        verify(&discovered, &applied, &self.root, kind)
    }

    /// History rows for this backend
    pub async fn history(&self, backend: &dyn StorageBackend) -> StorageResult<Vec<AppliedMigration>> {
        backend.ensure_history_table().await?;
        backend.applied_migrations().await
    }

    /// Every known version with its state, ordered by version
    pub async fn status(&self, backend: &dyn StorageBackend) -> StorageResult<Vec<MigrationStatus>> {
        let discovered = self.discover(backend.kind())?;
        let applied = self.history(backend).await?;

        let mut statuses: Vec<MigrationStatus> = discovered
            .iter()
            .map(|migration| {
                let recorded = find_applied(&applied, &migration.version);
                let state = match recorded {
                    Some(row) if row.checksum == migration.checksum => MigrationState::Applied,
                    Some(_) => MigrationState::Modified,
                    None => MigrationState::Pending,
                };
                MigrationStatus {
                    version: migration.version.clone(),
                    name: migration.name.clone(),
                    state,
                    applied_at: recorded.map(|row| row.applied_at),
                }
            })
            .collect();

        statuses.extend(
            applied
                .iter()
                .filter(|row| find_discovered(&discovered, &row.version).is_none())
                .map(|row| MigrationStatus {
                    version: row.version.clone(),
                    name: row.name.clone(),
                    state: MigrationState::Missing,
                    applied_at: Some(row.applied_at),
                }),
        );
        statuses.sort_by(|a, b| Migration::compare_versions(&a.version, &b.version));
        Ok(statuses)
    }

    fn lock_key(&self, kind: BackendKind) -> String {
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        format!("{}/{}", root.display(), kind.as_str())
    }
}

fn validate_target(target: &str) -> StorageResult<()> {
    if target.is_empty() || !target.chars().all(|c| c.is_ascii_digit()) {
        return Err(StorageError::config(format!(
            "migration target '{}' must be a digit-only version",
            target
        )));
    }
    Ok(())
}

fn find_applied<'a>(applied: &'a [AppliedMigration], version: &str) -> Option<&'a AppliedMigration> {
    applied
        .iter()
        .find(|row| Migration::compare_versions(&row.version, version) == Ordering::Equal)
}

fn find_discovered<'a>(discovered: &'a [Migration], version: &str) -> Option<&'a Migration> {
    discovered
        .iter()
        .find(|m| Migration::compare_versions(&m.version, version) == Ordering::Equal)
}

/// Every applied version must still be on disk with the recorded checksum
pub(crate) fn verify(
    discovered: &[Migration],
    applied: &[AppliedMigration],
    root: &Path,
    kind: BackendKind,
) -> StorageResult<()> {
    for row in applied {
        let Some(migration) = find_discovered(discovered, &row.version) else {
            return Err(StorageError::integrity(format!(
                "applied migration V{} ({}) is missing from {}",
                row.version,
                row.name,
                root.join(kind.as_str()).display()
            )));
        };
        if migration.checksum != row.checksum {
            return Err(StorageError::integrity(format!(
                "checksum mismatch for V{} ({}): recorded {}, on disk {}",
                row.version, row.name, row.checksum, migration.checksum
            )));
        }
    }
    Ok(())
}

/// Unapplied versions in ascending order, cut at `target`; the second list holds versions beyond it
pub(crate) fn plan<'a>(
    discovered: &'a [Migration],
    applied: &[AppliedMigration],
    target: Option<&str>,
) -> (Vec<&'a Migration>, Vec<String>) {
    let mut pending = Vec::new();
    let mut skipped = Vec::new();

    for migration in discovered {
        if find_applied(applied, &migration.version).is_some() {
            continue;
        }
        let beyond = target
            .is_some_and(|t| Migration::compare_versions(&migration.version, t) == Ordering::Greater);
        if beyond {
            skipped.push(migration.version.clone());
        } else {
            pending.push(migration);
        }
    }

    pending.sort_by(|a, b| Migration::compare_versions(&a.version, &b.version));
    (pending, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::checksum::checksum;
    use chrono::Utc;
    use std::time::Duration;

    fn script(version: &str, name: &str, content: &str) -> Migration {
        Migration {
            version: version.to_string(),
            name: name.to_string(),
            content: content.to_string(),
            checksum: checksum(content.as_bytes()),
            path: PathBuf::from(format!("migrations/sqlite/V{}__{}.sql", version, name)),
        }
    }

    fn applied(migration: &Migration) -> AppliedMigration {
        AppliedMigration {
            version: migration.version.clone(),
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at: Utc::now(),
            execution_time: Duration::from_millis(3),
            backend_kind: BackendKind::Sqlite,
        }
    }

    fn scripts() -> Vec<Migration> {
        vec![
            script("001", "create_sessions", "CREATE TABLE sessions (id TEXT);"),
            script("002", "create_tool_events", "CREATE TABLE tool_events (id TEXT);"),
            script("003", "create_prompts", "CREATE TABLE prompts (id TEXT);"),
        ]
    }

    #[test]
    fn test_plan_skips_applied_versions() {
        let discovered = scripts();
        let history = vec![applied(&discovered[0])];

        let (pending, skipped) = plan(&discovered, &history, None);
        let versions: Vec<&str> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, ["002", "003"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_plan_respects_target() {
        let discovered = scripts();
        let (pending, skipped) = plan(&discovered, &[], Some("2"));
        let versions: Vec<&str> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, ["001", "002"]);
        assert_eq!(skipped, ["003"]);
    }

    #[test]
    fn test_plan_is_empty_when_everything_applied() {
        let discovered = scripts();
        let history: Vec<_> = discovered.iter().map(applied).collect();
        let (pending, _) = plan(&discovered, &history, None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_verify_detects_modified_script() {
        let discovered = scripts();
        let mut history: Vec<_> = discovered.iter().take(2).map(applied).collect();
        history[1].checksum = checksum(b"CREATE TABLE tool_events (id TEXT, extra TEXT);");

        let err = verify(&discovered, &history, Path::new("migrations"), BackendKind::Sqlite)
            .unwrap_err();
        assert!(matches!(err, StorageError::MigrationIntegrity(_)));
        assert!(err.to_string().contains("V002"));
    }

    #[test]
    fn test_verify_detects_missing_script() {
        let discovered = scripts();
        let mut history: Vec<_> = discovered.iter().map(applied).collect();
        history.push(AppliedMigration {
            version: "004".to_string(),
            name: "dropped".to_string(),
            ..history[0].clone()
        });

        let err = verify(&discovered, &history, Path::new("migrations"), BackendKind::Sqlite)
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_target_must_be_digits() {
        assert!(validate_target("003").is_ok());
        assert!(validate_target("v3").is_err());
        assert!(validate_target("").is_err());
    }
}

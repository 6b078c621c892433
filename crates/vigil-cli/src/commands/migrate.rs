//! Migration commands

use anyhow::{Context, anyhow};
use colored::*;
use std::sync::Arc;
use vigil_core::storage::StorageBackend;
use vigil_core::{MigrationManager, StorageConfig, StorageManager};

use super::connect_once;
use super::output::{header, migration_icon};

async fn open(config: StorageConfig) -> anyhow::Result<(StorageManager, Arc<dyn StorageBackend>)> {
    if config.migrations.dir.is_none() {
        return Err(anyhow!(
            "no migrations directory configured (set VIGIL_MIGRATIONS_DIR or --migrations-dir)"
        ));
    }
    let manager = connect_once(config).await?;
    let backend = manager
        .active_storage()
        .ok_or(vigil_core::StorageError::NoAvailableBackend)?;
    Ok((manager, backend))
}

fn runner(manager: &StorageManager) -> anyhow::Result<&MigrationManager> {
    manager
        .migrations()
        .ok_or_else(|| anyhow!("no migrations directory configured"))
}

pub async fn migrate(mut config: StorageConfig, target: Option<String>) -> anyhow::Result<()> {
    if target.is_some() {
        config.migrations.target = target;
    }
    let (manager, backend) = open(config).await?;

    let report = manager
        .run_migrations()
        .await
        .with_context(|| format!("migration failed on {}", backend.kind()))?;

    header(&format!("Migrations ({})", backend.kind()));
    if report.is_noop() {
        println!("Schema is up to date ({} applied)", report.already_applied);
    }
    for applied in &report.applied {
        println!(
            "  {} V{} {} {}",
            "✓".green().bold(),
            applied.version,
            applied.name,
            format!("({:?})", applied.execution_time).dimmed()
        );
    }
    if !report.skipped.is_empty() {
        println!(
            "  {} beyond target: {}",
            "·".dimmed(),
            report.skipped.join(", ")
        );
    }

    manager.shutdown().await?;
    Ok(())
}

pub async fn status(config: StorageConfig) -> anyhow::Result<()> {
    let (manager, backend) = open(config).await?;
    let statuses = runner(&manager)?.status(backend.as_ref()).await?;

    header(&format!("Migration status ({})", backend.kind()));
    if statuses.is_empty() {
        println!("No migrations found");
    }
    for status in &statuses {
        let applied_at = status
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {} V{:<16} {:<32} {:<9} {}",
            migration_icon(status.state),
            status.version,
            status.name,
            format!("{:?}", status.state).to_lowercase(),
            applied_at.dimmed()
        );
    }

    manager.shutdown().await?;
    Ok(())
}

pub async fn verify(config: StorageConfig) -> anyhow::Result<()> {
    let (manager, backend) = open(config).await?;
    runner(&manager)?.verify(backend.as_ref()).await?;
    println!(
        "{} applied migrations match the scripts on disk ({})",
        "✓".green().bold(),
        backend.kind()
    );
    manager.shutdown().await?;
    Ok(())
}

pub async fn history(config: StorageConfig) -> anyhow::Result<()> {
    let (manager, backend) = open(config).await?;
    let rows = runner(&manager)?.history(backend.as_ref()).await?;

    header(&format!("Migration history ({})", backend.kind()));
    for row in &rows {
        println!(
            "  V{:<16} {:<32} {} {}",
            row.version,
            row.name,
            row.applied_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{}…", &row.checksum[..12.min(row.checksum.len())]).dimmed()
        );
    }
    println!("{} applied", rows.len());

    manager.shutdown().await?;
    Ok(())
}

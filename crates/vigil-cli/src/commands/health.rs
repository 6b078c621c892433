//! Health commands

use colored::*;
use std::time::Duration;
use vigil_core::{HealthSnapshot, StorageConfig, StorageManager};

use super::connect_once;
use super::output::{header, status_label};

fn print_snapshot(snapshot: &HealthSnapshot) {
    header("Storage health");
    println!(
        "  Status:   {} ({})",
        status_label(snapshot.status),
        snapshot
            .backend_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "no backend".to_string())
    );

    for (role, health) in [("primary", &snapshot.primary), ("fallback", &snapshot.fallback)] {
        let Some(health) = health else {
            continue;
        };
        let mut line = format!(
            "  {:<9} {} failures={}",
            format!("{}:", role),
            status_label(health.status),
            health.consecutive_failures
        );
        if let Some(error) = &health.last_error {
            line.push_str(&format!(" {}", error.dimmed()));
        }
        println!("{}", line);
    }

    for circuit in &snapshot.circuits {
        println!(
            "  circuit {:<9} {} (rejected {})",
            circuit.role, circuit.state, circuit.rejected_calls
        );
    }

    let stats = &snapshot.stats;
    println!(
        "  ops={} failed={} retries={} failovers={} recoveries={}",
        stats.total_operations,
        stats.failed_operations,
        stats.retries,
        stats.failovers,
        stats.recoveries
    );
}

pub async fn health(config: StorageConfig, json: bool) -> anyhow::Result<()> {
    let manager = connect_once(config).await?;
    let snapshot = manager.check_health().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }

    manager.shutdown().await?;
    Ok(())
}

pub async fn monitor(config: StorageConfig, every: Duration) -> anyhow::Result<()> {
    let manager = StorageManager::connect(config).await?;
    print_snapshot(&manager.health_snapshot());

    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Stopping monitor...".dimmed());
                break;
            }
            _ = ticker.tick() => print_snapshot(&manager.health_snapshot()),
        }
    }

    manager.shutdown().await?;
    Ok(())
}

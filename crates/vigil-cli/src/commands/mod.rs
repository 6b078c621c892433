//! Command handlers

mod health;
mod migrate;
mod output;

pub use health::{health, monitor};
pub use migrate::{history, migrate, status, verify};

use anyhow::Context;
use vigil_core::{StorageConfig, StorageManager};

/// Connect without startup migrations or the background monitor
pub async fn connect_once(config: StorageConfig) -> anyhow::Result<StorageManager> {
    StorageManager::builder(config.without_auto_migrate())
        .without_monitor()
        .build()
        .await
        .context("failed to initialize storage")
}

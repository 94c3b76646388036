// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk — 3D Print Farm Supervisor
//
// Entry point. Initialises logging, opens the queue store, and runs the
// supervisor loop until interrupted.

mod data_dir;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;

use druckwerk_core::config::FarmConfig;
use druckwerk_core::error::Result;
use druckwerk_farm::client::PrinterConnector;
use druckwerk_farm::{OctoConnector, Supervisor};
use druckwerk_store::{QueueStore, SqliteQueueStore};

const CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Druckwerk starting");

    let dir = data_dir::data_dir();
    let config = match load_config(&dir) {
        Some(config) => config,
        None => {
            // First run: write the defaults out so operators have a file
            // to edit.
            let config = FarmConfig::default();
            persist_config(&dir, &config)?;
            tracing::info!(path = %dir.join(CONFIG_FILE).display(), "wrote default configuration");
            config
        }
    };

    let store = Arc::new(SqliteQueueStore::open(
        dir.join("queue.db"),
        dir.join("artifacts"),
    )?);
    let connector = Arc::new(OctoConnector::new()?);
    let mut supervisor = Supervisor::new(
        store as Arc<dyn QueueStore>,
        connector as Arc<dyn PrinterConnector>,
        config,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    supervisor.run(shutdown_rx).await;
    tracing::info!("Druckwerk stopped");
    Ok(())
}

fn load_config(data_dir: &Path) -> Option<FarmConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&data).ok()
}

fn persist_config(data_dir: &Path, config: &FarmConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

//! Standalone process hosting an [`Engine`]: wires up storage, logs matches
//! and timer fires, and stays alive until interrupted. Rule registration in
//! this binary is a placeholder for whatever external loader (§1, out of
//! scope) eventually feeds it rules over a real transport.

use std::sync::Arc;

use temporal_kernel::{Engine, EngineConfig, FileStorageAdapter, SharedStorageAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::default();
    let engine = match std::env::var("TEMPORAL_KERNEL_STORAGE_DIR") {
        Ok(dir) => {
            tracing::info!(%dir, "starting with durable file-backed storage");
            let storage: SharedStorageAdapter = Arc::new(FileStorageAdapter::new(dir));
            Engine::with_storage(config, storage).await?
        }
        Err(_) => {
            tracing::info!("starting with in-memory storage (set TEMPORAL_KERNEL_STORAGE_DIR for durability)");
            Engine::new(config)
        }
    };

    let mut matches = engine.subscribe_matches();
    tokio::spawn(async move {
        while let Ok(matched) = matches.recv().await {
            tracing::info!(rule_id = %matched.rule_id, instance_id = %matched.instance_id, "pattern matched");
        }
    });

    let mut fired = engine.subscribe_timer_fired();
    tokio::spawn(async move {
        while let Ok(timer_fired) = fired.recv().await {
            tracing::info!(name = %timer_fired.name, topic = %timer_fired.topic, "timer fired");
        }
    });

    tracing::info!("temporal kernel running, waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    Ok(())
}

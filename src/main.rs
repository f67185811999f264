use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stride::auth::RestoreOutcome;
use stride::sync::SyncEvent;
use stride::{AppConfig, StrideCore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stride=info")))
        .init();

    info!("Starting stride sync daemon...");

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!("Using data directory {:?}", config.data_dir);

    let core = StrideCore::open(&config).await?;

    let (sync_event_sender, sync_event_receiver) = mpsc::unbounded_channel::<SyncEvent>();
    let sync_service = core.sync_service.clone();
    let service_handle = tokio::spawn(async move {
        if let Err(e) = sync_service.start(sync_event_receiver).await {
            error!("Sync service error: {}", e);
        }
    });

    match core.session.restore_session().await {
        RestoreOutcome::Success => {
            info!("Restored previous session");
            let _ = sync_event_sender.send(SyncEvent::AuthChanged(true));
        }
        RestoreOutcome::NoSession => info!("No stored session, waiting for sign-in"),
        RestoreOutcome::InvalidToken => warn!("Stored session was rejected, sign-in required"),
        RestoreOutcome::StorageCorrupted => warn!("Credential storage was corrupted and has been reset"),
        RestoreOutcome::Error(reason) => warn!("Could not restore session right now: {}", reason),
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    drop(sync_event_sender);
    let _ = service_handle.await;
    core.database.close().await;

    Ok(())
}

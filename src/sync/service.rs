use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::coordinator::{SyncCoordinator, SyncReport};
use crate::auth::{RestoreOutcome, SessionManager};

#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// User pulled to refresh or otherwise asked for a sync now
    SyncRequested,
    AuthChanged(bool),
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub total_synced: usize,
}

/// Drives the coordinator periodically and on demand, one sweep at a time
pub struct SyncService {
    session: Arc<SessionManager>,
    coordinator: Arc<SyncCoordinator>,
    sync_interval: Duration,
    status: Arc<RwLock<SyncStatus>>,
    syncing: AtomicBool,
}

/// Marks a sweep in flight; released on drop, including when the sweep is cancelled
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncService {
    pub fn new(session: Arc<SessionManager>, coordinator: Arc<SyncCoordinator>, sync_interval: Duration) -> Self {
        Self {
            session,
            coordinator,
            sync_interval,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            syncing: AtomicBool::new(false),
        }
    }

    /// Run the service until the event channel closes
    pub async fn start(self: Arc<Self>, mut event_rx: mpsc::UnboundedReceiver<SyncEvent>) -> Result<()> {
        info!("Starting sync service (every {:?})", self.sync_interval);

        let sync_service = self.clone();
        let periodic = tokio::spawn(async move {
            let mut sync_interval = interval(sync_service.sync_interval);
            sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                sync_interval.tick().await;

                if sync_service.session.is_authenticated().await {
                    sync_service.perform_sync().await;
                }
            }
        });

        while let Some(event) = event_rx.recv().await {
            match event {
                SyncEvent::SyncRequested => {
                    info!("Manual sync requested");
                    if self.session.is_authenticated().await {
                        let sync_service = self.clone();
                        tokio::spawn(async move {
                            sync_service.perform_sync().await;
                        });
                    } else {
                        warn!("Sync requested but not authenticated");
                    }
                }

                SyncEvent::AuthChanged(is_authenticated) => {
                    info!("Auth state changed: authenticated={}", is_authenticated);
                    if is_authenticated {
                        let sync_service = self.clone();
                        tokio::spawn(async move {
                            let scope = sync_service.session.current_scope().await;
                            if let Err(e) = sync_service.coordinator.pull_remote(&scope).await {
                                error!("Post-login profile pull failed: {}", e);
                            }
                            sync_service.perform_sync().await;
                        });
                    }
                }
            }
        }

        periodic.abort();
        info!("Sync service stopped");
        Ok(())
    }

    /// Run one sweep unless another one is already in flight.
    ///
    /// Returns `None` when the sweep was skipped. An expired session is
    /// refreshed from the stored credential first.
    pub async fn perform_sync(&self) -> Option<SyncReport> {
        let Some(_sweep) = SweepGuard::acquire(&self.syncing) else {
            debug!("Sync already in progress");
            return None;
        };

        let report = match self.ensure_fresh_session().await {
            Ok(()) => {
                let scope = self.session.current_scope().await;
                self.coordinator.perform_sync(&scope).await
            }
            Err(reason) => {
                warn!("Skipping sweep: {}", reason);
                SyncReport {
                    synced_fields: Vec::new(),
                    errors: vec![reason],
                }
            }
        };

        {
            let mut status = self.status.write().await;
            status.last_sync = Some(Utc::now());
            status.total_synced += report.synced_fields.len();
            status.last_report = Some(report.clone());
        }

        if report.is_clean() {
            debug!("Sync completed successfully");
        } else {
            warn!("Sync completed with {} errors", report.errors.len());
        }

        Some(report)
    }

    async fn ensure_fresh_session(&self) -> Result<(), String> {
        let expired = self
            .session
            .current_session()
            .await
            .is_some_and(|session| session.is_expired());
        if !expired {
            return Ok(());
        }

        info!("Access token expired, refreshing session");
        match self.session.restore_session().await {
            RestoreOutcome::Success => Ok(()),
            outcome => Err(format!("Session expired and could not be refreshed: {:?}", outcome)),
        }
    }

    /// Trigger a sweep now; fails when signed out or a sweep is running
    pub async fn trigger_sync(&self) -> Result<SyncReport> {
        if !self.session.is_authenticated().await {
            return Err(anyhow::anyhow!("Not authenticated"));
        }

        self.perform_sync()
            .await
            .ok_or_else(|| anyhow::anyhow!("A sync is already in progress"))
    }

    pub async fn get_status(&self) -> SyncStatus {
        let mut status = self.status.read().await.clone();
        status.is_syncing = self.syncing.load(Ordering::Acquire);
        status
    }
}

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::auth::{CredentialStore, FileKeystore, HttpAuthClient, SessionManager};
use crate::config::AppConfig;
use crate::storage::{Database, PreferenceStore, ProfileStore, SyncFlagRegistry, PROFILE_PARTITION};
use crate::sync::{HttpProfileApi, SyncCoordinator, SyncService};

/// The assembled identity and sync stack for one data directory
pub struct StrideCore {
    pub database: Arc<Database>,
    pub session: Arc<SessionManager>,
    pub coordinator: Arc<SyncCoordinator>,
    pub sync_service: Arc<SyncService>,
}

impl StrideCore {
    /// Open storage and wire the HTTP collaborators described by `config`
    pub async fn open(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

        let database = Arc::new(Database::new(config.database_path()).await?);
        info!("Database initialized");

        let keystore = Arc::new(FileKeystore::new(config.keystore_dir()));
        let credentials = Arc::new(CredentialStore::new(keystore, database.clone(), config.key_alias.clone()));

        let auth = Arc::new(
            HttpAuthClient::new(config.api_url.clone(), config.api_key.clone(), config.remote_timeout)
                .context("Failed to build auth client")?,
        );
        let session = Arc::new(SessionManager::new(credentials, auth, config.remote_timeout));

        let remote = Arc::new(
            HttpProfileApi::new(
                config.api_url.clone(),
                config.api_key.clone(),
                config.remote_timeout,
                session.clone(),
            )
            .context("Failed to build profile client")?,
        );

        let prefs = PreferenceStore::new(database.clone(), PROFILE_PARTITION);
        let coordinator = Arc::new(SyncCoordinator::new(
            ProfileStore::new(prefs.clone()),
            SyncFlagRegistry::new(prefs),
            remote,
            config.remote_timeout,
        ));

        let sync_service = Arc::new(SyncService::new(session.clone(), coordinator.clone(), config.sync_interval));

        Ok(Self {
            database,
            session,
            coordinator,
            sync_service,
        })
    }
}

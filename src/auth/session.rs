use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::credential_store::{CredentialStore, HealthStatus, LoadOutcome};
use super::remote::{AuthSession, RefreshResponse, RemoteAuth};
use crate::error::CredentialError;
use crate::storage::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Restoring,
    Authenticated,
    Failed,
}

/// Result of a cold-start session restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Success,
    NoSession,
    /// The remote side rejected the stored credential; it has been purged
    InvalidToken,
    /// Credential storage was damaged and has been wiped
    StorageCorrupted,
    /// Transient failure; the stored credential was left in place
    Error(String),
}

/// Bridges the persisted refresh credential and the remote auth service
pub struct SessionManager {
    credentials: Arc<CredentialStore>,
    auth: Arc<dyn RemoteAuth>,
    remote_timeout: Duration,
    state: RwLock<SessionState>,
    session: RwLock<Option<AuthSession>>,
}

impl SessionManager {
    pub fn new(credentials: Arc<CredentialStore>, auth: Arc<dyn RemoteAuth>, remote_timeout: Duration) -> Self {
        Self {
            credentials,
            auth,
            remote_timeout,
            state: RwLock::new(SessionState::Unauthenticated),
            session: RwLock::new(None),
        }
    }

    /// Restore the previous session from the stored refresh credential
    pub async fn restore_session(&self) -> RestoreOutcome {
        self.set_state(SessionState::Restoring).await;

        let outcome = self.try_restore().await;
        let next = match outcome {
            RestoreOutcome::Success => SessionState::Authenticated,
            RestoreOutcome::NoSession => SessionState::Unauthenticated,
            _ => SessionState::Failed,
        };
        if next != SessionState::Authenticated {
            *self.session.write().await = None;
        }
        self.set_state(next).await;

        info!("Session restore finished: {:?}", outcome);
        outcome
    }

    async fn try_restore(&self) -> RestoreOutcome {
        match self.credentials.health_check().await {
            Ok(HealthStatus::Healthy) => {}
            Ok(HealthStatus::Corrupted) => return RestoreOutcome::StorageCorrupted,
            Err(e) => return RestoreOutcome::Error(format!("Credential store unavailable: {}", e)),
        }

        let refresh_token = match self.credentials.load().await {
            Ok(LoadOutcome::Found(token)) => token,
            Ok(LoadOutcome::NotFound) => return RestoreOutcome::NoSession,
            Ok(LoadOutcome::Corrupted) => return RestoreOutcome::StorageCorrupted,
            Err(e) => return RestoreOutcome::Error(format!("Failed to load credential: {}", e)),
        };

        let response = match tokio::time::timeout(self.remote_timeout, self.auth.refresh_session(&refresh_token)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Session refresh failed: {}", e);
                return RestoreOutcome::Error(e.to_string());
            }
            Err(_) => {
                warn!("Session refresh timed out after {:?}", self.remote_timeout);
                return RestoreOutcome::Error(format!("Session refresh timed out after {:?}", self.remote_timeout));
            }
        };

        match response {
            RefreshResponse::Accepted(session) => {
                // The remote side may rotate the refresh token; persist what it returned
                if let Err(e) = self.credentials.save(&session.refresh_token).await {
                    error!("Session restored but the rotated credential could not be stored: {}", e);
                }
                debug!("Session restored for user {}", session.user_id);
                *self.session.write().await = Some(session);
                RestoreOutcome::Success
            }
            RefreshResponse::Rejected { reason } => {
                warn!("Stored credential rejected: {}", reason);
                match self.credentials.clear().await {
                    Ok(()) => RestoreOutcome::InvalidToken,
                    Err(e) => {
                        error!("Failed to purge rejected credential: {}", e);
                        RestoreOutcome::Error(format!("Rejected credential could not be purged: {}", e))
                    }
                }
            }
        }
    }

    /// Take over a session obtained elsewhere (e.g. an interactive login)
    pub async fn adopt_session(&self, session: AuthSession) -> Result<(), CredentialError> {
        self.credentials.save(&session.refresh_token).await?;
        info!("Adopted session for user {}", session.user_id);
        *self.session.write().await = Some(session);
        self.set_state(SessionState::Authenticated).await;
        Ok(())
    }

    /// Persist the refresh credential of the current in-memory session
    pub async fn save_current_session(&self) -> Result<bool, CredentialError> {
        let session = self.session.read().await.clone();
        match session {
            Some(session) => {
                self.credentials.save(&session.refresh_token).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear_session(&self) -> Result<(), CredentialError> {
        self.credentials.clear().await
    }

    pub async fn has_stored_session(&self) -> Result<bool, CredentialError> {
        self.credentials.is_token_stored().await
    }

    /// Drop the in-memory session and the stored credential
    pub async fn sign_out(&self) -> Result<(), CredentialError> {
        *self.session.write().await = None;
        self.set_state(SessionState::Unauthenticated).await;
        self.credentials.clear().await?;
        info!("Signed out");
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.access_token.clone())
    }

    /// Preference scope of the signed-in user, global when signed out
    pub async fn current_scope(&self) -> Scope {
        let session = self.session.read().await;
        Scope::for_user(session.as_ref().map(|s| s.user_id.as_str()))
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Session state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

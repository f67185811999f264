use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::api::{RemoteProfile, RemoteProfileStore};
use crate::error::{PreferenceError, RemoteError};
use crate::storage::{FieldValue, ProfileStore, Scope, SyncField, SyncFlagRegistry};

/// Outcome of one sweep over the sync flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced_fields: Vec<SyncField>,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reconciles locally edited profile fields with the remote store.
///
/// Every decision is read from the flag registry, so a sweep can be retried
/// at any time. Local writes and flag clears are serialized through
/// `local_writes`; a flag is only cleared while the local value still equals
/// the one the remote store confirmed.
pub struct SyncCoordinator {
    profile: ProfileStore,
    flags: SyncFlagRegistry,
    remote: Arc<dyn RemoteProfileStore>,
    remote_timeout: Duration,
    local_writes: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        profile: ProfileStore,
        flags: SyncFlagRegistry,
        remote: Arc<dyn RemoteProfileStore>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            profile,
            flags,
            remote,
            remote_timeout,
            local_writes: Mutex::new(()),
        }
    }

    pub fn profile(&self) -> &ProfileStore {
        &self.profile
    }

    pub fn flags(&self) -> &SyncFlagRegistry {
        &self.flags
    }

    /// Push every flagged field to the remote store.
    ///
    /// Fields are processed one at a time in a fixed order. A failure is
    /// recorded and leaves that field's flag set; it never stops the sweep.
    pub async fn perform_sync(&self, scope: &Scope) -> SyncReport {
        let mut report = SyncReport::default();

        let Some(user_id) = scope.user_id() else {
            report.errors.push("Cannot sync without a signed-in user".to_string());
            return report;
        };

        for field in SyncField::ALL {
            match self.flags.does_field_need_sync(scope, field).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    report.errors.push(format!("{}: failed to read sync flag: {}", field, e));
                    continue;
                }
            }

            match self.sync_field(scope, user_id, field).await {
                Ok(()) => report.synced_fields.push(field),
                Err(reason) => {
                    warn!("Sync of {} failed: {}", field, reason);
                    report.errors.push(format!("{}: {}", field, reason));
                }
            }
        }

        info!(
            "Sync sweep for {}: {} synced, {} failed",
            scope,
            report.synced_fields.len(),
            report.errors.len()
        );
        report
    }

    async fn sync_field(&self, scope: &Scope, user_id: &str, field: SyncField) -> Result<(), String> {
        let value = self
            .profile
            .field_value(scope, field)
            .await
            .map_err(|e| format!("failed to read local value: {}", e))?
            .ok_or_else(|| "no local value to push".to_string())?;

        match self.push(user_id, field, &value).await {
            Ok(true) => {}
            Ok(false) => return Err("remote store refused the update".to_string()),
            Err(e) => return Err(e.to_string()),
        }

        let cleared = self
            .clear_if_unchanged(scope, field, &value)
            .await
            .map_err(|e| format!("pushed but failed to clear sync flag: {}", e))?;
        if !cleared {
            return Err("local value changed during push, newer edit still pending".to_string());
        }

        debug!("{} synced for {}", field, scope);
        Ok(())
    }

    /// Clear the flag only if the local value is still `pushed`
    async fn clear_if_unchanged(
        &self,
        scope: &Scope,
        field: SyncField,
        pushed: &FieldValue,
    ) -> Result<bool, PreferenceError> {
        let _guard = self.local_writes.lock().await;
        let unchanged = match self.profile.field_value(scope, field).await? {
            Some(FieldValue::Code(code)) => code == pushed.to_code(),
            Some(current) => current.to_text() == pushed.to_text(),
            None => false,
        };
        if !unchanged {
            debug!("{} was edited while its push was in flight", field);
            return Ok(false);
        }
        self.flags.mark_needing_sync(scope, field, false).await?;
        Ok(true)
    }

    /// Local-first edit: persist, flag, then try to push right away.
    ///
    /// Returns whether the field is now in sync. Only local persistence
    /// failures are errors; a failed push leaves the field flagged for the
    /// next sweep.
    pub async fn commit_local_edit(
        &self,
        scope: &Scope,
        field: SyncField,
        value: FieldValue,
    ) -> Result<bool, PreferenceError> {
        {
            let _guard = self.local_writes.lock().await;
            self.profile.set_field_value(scope, field, &value).await?;
            self.flags.mark_needing_sync(scope, field, true).await?;
        }

        let Some(user_id) = scope.user_id() else {
            debug!("{} edited while signed out, left for a later sweep", field);
            return Ok(false);
        };

        match self.push(user_id, field, &value).await {
            Ok(true) => self.clear_if_unchanged(scope, field, &value).await,
            Ok(false) => {
                debug!("Remote refused {} update, will retry on next sweep", field);
                Ok(false)
            }
            Err(e) => {
                debug!("Could not push {} now ({}), will retry on next sweep", field, e);
                Ok(false)
            }
        }
    }

    /// Store a new step goal and push it on a best-effort basis
    pub async fn set_step_goal(&self, scope: &Scope, goal: i64) -> Result<bool, PreferenceError> {
        self.profile.set_step_goal(scope, goal).await?;

        let Some(user_id) = scope.user_id() else {
            return Ok(false);
        };

        match self.bounded(self.remote.update_step_goal(user_id, goal)).await {
            Ok(pushed) => Ok(pushed),
            Err(e) => {
                warn!("Step goal push failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Refresh local values from the remote profile.
    ///
    /// Fields with unsynced local edits keep their local value. Returns the
    /// fields that were overwritten.
    pub async fn pull_remote(&self, scope: &Scope) -> anyhow::Result<Vec<SyncField>> {
        let user_id = scope
            .user_id()
            .ok_or_else(|| anyhow::anyhow!("Cannot pull without a signed-in user"))?;

        let Some(remote) = self.bounded(self.remote.fetch_profile(user_id)).await? else {
            debug!("No remote profile for {}", user_id);
            return Ok(Vec::new());
        };

        let mut refreshed = Vec::new();
        for field in SyncField::ALL {
            let Some(value) = remote_value(&remote, field) else {
                continue;
            };
            let _guard = self.local_writes.lock().await;
            if self.flags.does_field_need_sync(scope, field).await? {
                debug!("Keeping unsynced local {}", field);
                continue;
            }
            if self.profile.field_value(scope, field).await?.as_ref() == Some(&value) {
                continue;
            }
            self.profile.set_field_value(scope, field, &value).await?;
            refreshed.push(field);
        }

        if let Some(goal) = remote.step_goal {
            self.profile.set_step_goal(scope, goal).await?;
        }

        info!("Pulled remote profile for {}: {} fields refreshed", scope, refreshed.len());
        Ok(refreshed)
    }

    async fn push(&self, user_id: &str, field: SyncField, value: &FieldValue) -> Result<bool, RemoteError> {
        match field {
            SyncField::ProfilePicture => {
                self.bounded(self.remote.update_profile_picture(user_id, &value.to_text())).await
            }
            SyncField::Interests => self.bounded(self.remote.update_interests(user_id, value.to_code())).await,
            SyncField::Name => self.bounded(self.remote.update_name(user_id, &value.to_text())).await,
            SyncField::Nickname => self.bounded(self.remote.update_nickname(user_id, &value.to_text())).await,
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, RemoteError>>) -> Result<T, RemoteError> {
        tokio::time::timeout(self.remote_timeout, call)
            .await
            .map_err(|_| RemoteError::Timeout(self.remote_timeout))?
    }
}

fn remote_value(remote: &RemoteProfile, field: SyncField) -> Option<FieldValue> {
    match field {
        SyncField::ProfilePicture => remote.profile_picture.clone().map(FieldValue::Text),
        SyncField::Interests => remote.interests.map(FieldValue::Code),
        SyncField::Name => remote.name.clone().map(FieldValue::Text),
        SyncField::Nickname => remote.nickname.clone().map(FieldValue::Text),
    }
}

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use stride::auth::{
    AuthSession, CredentialStore, FileKeystore, RefreshResponse, RemoteAuth, SessionManager,
    DEFAULT_KEY_ALIAS,
};
use stride::error::{PreferenceError, RemoteError};
use stride::storage::{
    Database, MemoryPreferences, PrefValue, PreferenceBackend, PreferenceStore, ProfileStore,
    SyncFlagRegistry, PROFILE_PARTITION, SECURE_PARTITION,
};
use stride::storage::preferences::PrefResult;
use stride::sync::{RemoteProfile, RemoteProfileStore, SyncCoordinator};

pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// Temporary data directory with a real database and file keystore
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub database: Arc<Database>,
    pub keystore: Arc<FileKeystore>,
}

impl TestEnvironment {
    pub async fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let database = Arc::new(Database::new(temp_dir.path().join("stride.db")).await?);
        let keystore = Arc::new(FileKeystore::new(temp_dir.path().join("keystore")));

        Ok(Self {
            temp_dir,
            database,
            keystore,
        })
    }

    pub fn credential_store(&self) -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(
            self.keystore.clone(),
            self.database.clone(),
            DEFAULT_KEY_ALIAS,
        ))
    }

    pub fn profile_prefs(&self) -> PreferenceStore {
        PreferenceStore::new(self.database.clone(), PROFILE_PARTITION)
    }

    pub fn coordinator(&self, remote: Arc<dyn RemoteProfileStore>) -> SyncCoordinator {
        let prefs = self.profile_prefs();
        SyncCoordinator::new(
            ProfileStore::new(prefs.clone()),
            SyncFlagRegistry::new(prefs),
            remote,
            TEST_TIMEOUT,
        )
    }

    /// Flip one byte of the stored credential blob
    pub async fn corrupt_credential(&self, index: usize) -> Result<()> {
        let Some(PrefValue::Str(encoded)) = self.database.get(SECURE_PARTITION, "refresh_token").await? else {
            anyhow::bail!("no credential stored");
        };
        let mut blob = general_purpose::STANDARD.decode(encoded)?;
        let index = index % blob.len();
        blob[index] ^= 0x01;
        self.database
            .put(SECURE_PARTITION, "refresh_token", &PrefValue::Str(general_purpose::STANDARD.encode(blob)))
            .await?;
        Ok(())
    }
}

/// Backend whose deletes fail while `fail_removes` is set
#[derive(Default)]
pub struct FlakyPreferences {
    inner: MemoryPreferences,
    pub fail_removes: AtomicBool,
}

#[async_trait]
impl PreferenceBackend for FlakyPreferences {
    async fn get(&self, partition: &str, key: &str) -> PrefResult<Option<PrefValue>> {
        self.inner.get(partition, key).await
    }

    async fn put(&self, partition: &str, key: &str, value: &PrefValue) -> PrefResult<()> {
        self.inner.put(partition, key, value).await
    }

    async fn remove(&self, partition: &str, key: &str) -> PrefResult<bool> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(PreferenceError::Backend(sqlx::Error::PoolClosed));
        }
        self.inner.remove(partition, key).await
    }

    async fn clear(&self, partition: &str) -> PrefResult<()> {
        self.inner.clear(partition).await
    }
}

pub fn session_for(user_id: &str, refresh_token: &str) -> AuthSession {
    AuthSession {
        user_id: user_id.to_string(),
        access_token: format!("access-{}", refresh_token),
        refresh_token: refresh_token.to_string(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    }
}

/// How the fake auth service answers refresh requests
#[derive(Clone)]
pub enum AuthBehavior {
    /// Accept and rotate to the given refresh token
    Accept { user_id: String, rotated: String },
    Reject,
    Fail,
    Hang,
}

pub struct FakeAuth {
    behavior: Mutex<AuthBehavior>,
    pub calls: AtomicUsize,
    pub presented: Mutex<Vec<String>>,
}

impl FakeAuth {
    pub fn new(behavior: AuthBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            presented: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAuth for FakeAuth {
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.presented.lock().unwrap().push(refresh_token.to_string());

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            AuthBehavior::Accept { user_id, rotated } => {
                Ok(RefreshResponse::Accepted(session_for(&user_id, &rotated)))
            }
            AuthBehavior::Reject => Ok(RefreshResponse::Rejected {
                reason: "invalid refresh token".to_string(),
            }),
            AuthBehavior::Fail => Err(RemoteError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
            AuthBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(RemoteError::Timeout(Duration::from_secs(30)))
            }
        }
    }
}

pub fn manager(credentials: Arc<CredentialStore>, auth: Arc<FakeAuth>) -> SessionManager {
    SessionManager::new(credentials, auth, TEST_TIMEOUT)
}

/// How the fake row store answers an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBehavior {
    Succeed,
    Refuse,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct FakeProfileApi {
    behaviors: Mutex<HashMap<&'static str, UpdateBehavior>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    pub calls: Mutex<Vec<(String, String)>>,
    pub profile: Mutex<Option<RemoteProfile>>,
}

impl FakeProfileApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, field: &'static str, behavior: UpdateBehavior) {
        self.behaviors.lock().unwrap().insert(field, behavior);
    }

    /// Hold the next update of `field` open until the returned gate is notified
    pub fn hold_next(&self, field: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(field, gate.clone());
        gate
    }

    pub fn last_value_for(&self, field: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.clone())
    }

    pub fn set_profile(&self, profile: RemoteProfile) {
        *self.profile.lock().unwrap() = Some(profile);
    }

    pub fn calls_for(&self, field: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(f, _)| f == field).count()
    }

    async fn answer(&self, field: &'static str, value: String) -> Result<bool, RemoteError> {
        self.calls.lock().unwrap().push((field.to_string(), value));
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(field)
            .copied()
            .unwrap_or(UpdateBehavior::Succeed);

        let gate = self.gates.lock().unwrap().remove(field);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match behavior {
            UpdateBehavior::Succeed => Ok(true),
            UpdateBehavior::Refuse => Ok(false),
            UpdateBehavior::Fail => Err(RemoteError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
            UpdateBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl RemoteProfileStore for FakeProfileApi {
    async fn update_step_goal(&self, _user_id: &str, goal: i64) -> Result<bool, RemoteError> {
        self.answer("step_goal", goal.to_string()).await
    }

    async fn update_interests(&self, _user_id: &str, code: i64) -> Result<bool, RemoteError> {
        self.answer("interests", code.to_string()).await
    }

    async fn update_nickname(&self, _user_id: &str, nickname: &str) -> Result<bool, RemoteError> {
        self.answer("nickname", nickname.to_string()).await
    }

    async fn update_name(&self, _user_id: &str, name: &str) -> Result<bool, RemoteError> {
        self.answer("name", name.to_string()).await
    }

    async fn update_profile_picture(&self, _user_id: &str, payload: &str) -> Result<bool, RemoteError> {
        self.answer("profile_picture", payload.to_string()).await
    }

    async fn fetch_profile(&self, _user_id: &str) -> Result<Option<RemoteProfile>, RemoteError> {
        Ok(self.profile.lock().unwrap().clone())
    }
}

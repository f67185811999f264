//! Encrypted-at-rest storage for the refresh credential.
//!
//! The blob is `base64(IV || ciphertext)` kept as a single string preference
//! in the secure partition. Any blob that does not decrypt to valid UTF-8
//! with the bound key is treated as corrupted: the store wipes the blob,
//! destroys the key and reports `Corrupted` so the next `save` starts clean.

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::keystore::{Keystore, SealedBox, IV_LEN, TAG_LEN};
use crate::error::{CredentialError, KeystoreError, PreferenceError};
use crate::storage::{PreferenceBackend, PreferenceStore, Scope, SECURE_PARTITION};

const REFRESH_TOKEN_KEY: &str = "refresh_token";

pub const DEFAULT_KEY_ALIAS: &str = "stride_credential_key";

/// Result of reading the stored credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Found(String),
    NotFound,
    /// The blob or key was damaged; both have been wiped
    Corrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Corrupted,
}

pub struct CredentialStore {
    keystore: Arc<dyn Keystore>,
    prefs: PreferenceStore,
    alias: String,
}

impl CredentialStore {
    pub fn new(keystore: Arc<dyn Keystore>, backend: Arc<dyn PreferenceBackend>, alias: impl Into<String>) -> Self {
        Self {
            keystore,
            prefs: PreferenceStore::new(backend, SECURE_PARTITION),
            alias: alias.into(),
        }
    }

    /// Encrypt and persist `secret`, replacing any previous one
    pub async fn save(&self, secret: &str) -> Result<(), CredentialError> {
        self.ensure_key().await?;

        let plaintext = secret.as_bytes().to_vec();
        let sealed = self
            .with_keystore(move |keystore, alias| keystore.encrypt(alias, &plaintext))
            .await?;

        let mut blob = Vec::with_capacity(IV_LEN + sealed.ciphertext.len());
        blob.extend_from_slice(&sealed.iv);
        blob.extend_from_slice(&sealed.ciphertext);

        self.prefs
            .put_string(&Scope::Global, REFRESH_TOKEN_KEY, general_purpose::STANDARD.encode(&blob))
            .await?;

        debug!("Stored encrypted credential ({} bytes)", blob.len());
        Ok(())
    }

    /// Decrypt the stored credential
    pub async fn load(&self) -> Result<LoadOutcome, CredentialError> {
        let encoded = match self.prefs.get_string(&Scope::Global, REFRESH_TOKEN_KEY).await {
            Ok(Some(encoded)) => encoded,
            Ok(None) => {
                debug!("No stored credential");
                return Ok(LoadOutcome::NotFound);
            }
            Err(PreferenceError::TypeMismatch { .. }) => {
                return self.corrupted("stored credential has the wrong type").await;
            }
            Err(PreferenceError::Encoding(e)) => {
                return self.corrupted(&format!("stored credential row is unreadable: {}", e)).await;
            }
            Err(e) => return Err(e.into()),
        };

        let Ok(blob) = general_purpose::STANDARD.decode(encoded.trim()) else {
            return self.corrupted("stored credential is not valid base64").await;
        };

        if blob.len() < IV_LEN + TAG_LEN {
            return self.corrupted("stored credential is truncated").await;
        }

        let (iv, ciphertext) = blob.split_at(IV_LEN);
        let (iv, ciphertext) = (iv.to_vec(), ciphertext.to_vec());
        let plaintext = match self
            .with_keystore(move |keystore, alias| keystore.decrypt(alias, &iv, &ciphertext))
            .await
        {
            Ok(plaintext) => plaintext,
            Err(e) if e.indicates_corruption() => {
                return self.corrupted(&e.to_string()).await;
            }
            Err(e) => return Err(e.into()),
        };

        match String::from_utf8(plaintext) {
            Ok(secret) => Ok(LoadOutcome::Found(secret)),
            Err(_) => self.corrupted("decrypted credential is not UTF-8").await,
        }
    }

    /// Delete the stored credential. Idempotent.
    pub async fn clear(&self) -> Result<(), CredentialError> {
        if self.prefs.remove(&Scope::Global, REFRESH_TOKEN_KEY).await? {
            info!("Stored credential cleared");
        }
        Ok(())
    }

    /// Whether a credential blob is present, without decrypting it
    pub async fn is_token_stored(&self) -> Result<bool, CredentialError> {
        Ok(self.prefs.contains(&Scope::Global, REFRESH_TOKEN_KEY).await?)
    }

    /// Round-trip a throwaway probe through the bound key.
    ///
    /// The stored credential is not read. A failed round trip wipes blob and
    /// key before `Corrupted` is returned.
    pub async fn health_check(&self) -> Result<HealthStatus, CredentialError> {
        self.ensure_key().await?;

        let probe = Uuid::new_v4().to_string();
        let plaintext = probe.clone().into_bytes();
        let result = self
            .with_keystore(move |keystore, alias| {
                let SealedBox { iv, ciphertext } = keystore.encrypt(alias, &plaintext)?;
                keystore.decrypt(alias, &iv, &ciphertext)
            })
            .await;

        match result {
            Ok(decrypted) if decrypted == probe.as_bytes() => Ok(HealthStatus::Healthy),
            Ok(_) => {
                self.heal("health probe decrypted to different bytes").await?;
                Ok(HealthStatus::Corrupted)
            }
            Err(e) if e.indicates_corruption() => {
                self.heal(&e.to_string()).await?;
                Ok(HealthStatus::Corrupted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wipe the stored credential and destroy the bound key
    pub async fn reset(&self) -> Result<(), CredentialError> {
        self.clear().await?;
        self.with_keystore(|keystore, alias| keystore.delete_key(alias)).await?;
        Ok(())
    }

    async fn corrupted(&self, reason: &str) -> Result<LoadOutcome, CredentialError> {
        self.heal(reason).await?;
        Ok(LoadOutcome::Corrupted)
    }

    async fn heal(&self, reason: &str) -> Result<(), CredentialError> {
        warn!("Credential storage corrupted ({}), wiping blob and key", reason);
        self.reset().await.map_err(|e| {
            error!("Failed to wipe corrupted credential storage: {}", e);
            e
        })
    }

    async fn ensure_key(&self) -> Result<(), CredentialError> {
        self.with_keystore(|keystore, alias| {
            if !keystore.contains_alias(alias)? {
                keystore.generate_key(alias)?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Run a keystore call on the blocking pool
    async fn with_keystore<T, F>(&self, f: F) -> Result<T, KeystoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Keystore, &str) -> Result<T, KeystoreError> + Send + 'static,
    {
        let keystore = self.keystore.clone();
        let alias = self.alias.clone();
        tokio::task::spawn_blocking(move || f(keystore.as_ref(), &alias))
            .await
            .map_err(|e| KeystoreError::Task(e.to_string()))?
    }
}

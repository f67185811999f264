use std::time::Duration;
use thiserror::Error;

/// Errors raised by a keystore backend
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Keystore I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("No key bound to alias '{alias}'")]
    KeyNotFound { alias: String },

    #[error("Key material for alias '{alias}' is unreadable")]
    InvalidKeyMaterial { alias: String },

    /// The AEAD tag did not verify: tampered ciphertext or a different key.
    #[error("Ciphertext failed authentication")]
    AuthenticationFailed,

    #[error("Cipher operation failed: {0}")]
    Cipher(String),

    #[error("Keystore task aborted: {0}")]
    Task(String),
}

impl KeystoreError {
    /// Whether this error means the stored material can no longer be trusted
    pub fn indicates_corruption(&self) -> bool {
        matches!(
            self,
            KeystoreError::AuthenticationFailed
                | KeystoreError::InvalidKeyMaterial { .. }
                | KeystoreError::KeyNotFound { .. }
        )
    }
}

/// Errors raised by preference persistence
#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Preference backend failed: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Failed to encode preference value: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Preference '{key}' holds a {found} value, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Unrecoverable failures of the credential store.
///
/// Corruption and absence are not errors; see `LoadOutcome` and `HealthStatus`.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Preferences(#[from] PreferenceError),
}

/// Failures talking to the remote auth or row-store service
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid remote URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Could not determine a data directory")]
    NoDataDir,
}

//! Symmetric key custody.
//!
//! Keys are addressed by alias and never leave the keystore: callers hand in
//! plaintext or ciphertext and get the other back. All ciphers are
//! AES-256-GCM with a random 12 byte IV per encryption.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::KeystoreError;

pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
/// GCM authentication tag length appended to every ciphertext
pub const TAG_LEN: usize = 16;

pub type KeystoreResult<T> = Result<T, KeystoreError>;

/// Output of one encryption
#[derive(Debug, Clone)]
pub struct SealedBox {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// OS or hardware backed custody of AES-256 keys.
///
/// Calls may block on disk, so async callers run them on the blocking pool.
pub trait Keystore: Send + Sync {
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool>;

    /// Generate and bind a fresh key, replacing any existing one
    fn generate_key(&self, alias: &str) -> KeystoreResult<()>;

    fn encrypt(&self, alias: &str, plaintext: &[u8]) -> KeystoreResult<SealedBox>;

    /// Fails with `AuthenticationFailed` when the tag does not verify
    fn decrypt(&self, alias: &str, iv: &[u8], ciphertext: &[u8]) -> KeystoreResult<Vec<u8>>;

    /// Remove the key bound to `alias`; missing aliases are not an error
    fn delete_key(&self, alias: &str) -> KeystoreResult<()>;
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> KeystoreResult<SealedBox> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| KeystoreError::Cipher(format!("Encryption failed: {}", e)))?;

    Ok(SealedBox { iv, ciphertext })
}

fn open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> KeystoreResult<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(KeystoreError::AuthenticationFailed);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| KeystoreError::AuthenticationFailed)
}

fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Software keystore persisting one key file per alias.
///
/// Key files are written with owner-only permissions and replaced atomically
/// (write to a temp file, then rename).
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.key", alias))
    }

    fn read_key(&self, alias: &str) -> KeystoreResult<[u8; KEY_LEN]> {
        let path = self.key_path(alias);
        let encoded = match std::fs::read_to_string(&path) {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeystoreError::KeyNotFound { alias: alias.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeystoreError::InvalidKeyMaterial { alias: alias.to_string() })?;

        bytes
            .try_into()
            .map_err(|_| KeystoreError::InvalidKeyMaterial { alias: alias.to_string() })
    }

    fn write_key(&self, alias: &str, key: &[u8; KEY_LEN]) -> KeystoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.key_path(alias);
        let tmp_path = self.dir.join(format!(".{}.key.tmp", alias));
        std::fs::write(&tmp_path, general_purpose::STANDARD.encode(key))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&tmp_path)?.permissions();
            perms.set_mode(0o600); // Only user can read/write
            std::fs::set_permissions(&tmp_path, perms)?;
        }

        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

impl Keystore for FileKeystore {
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool> {
        Ok(self.key_path(alias).exists())
    }

    fn generate_key(&self, alias: &str) -> KeystoreResult<()> {
        self.write_key(alias, &random_key())?;
        info!("Generated key for alias '{}'", alias);
        Ok(())
    }

    fn encrypt(&self, alias: &str, plaintext: &[u8]) -> KeystoreResult<SealedBox> {
        let key = self.read_key(alias)?;
        debug!("Encrypting {} bytes with '{}'", plaintext.len(), alias);
        seal(&key, plaintext)
    }

    fn decrypt(&self, alias: &str, iv: &[u8], ciphertext: &[u8]) -> KeystoreResult<Vec<u8>> {
        let key = self.read_key(alias)?;
        open(&key, iv, ciphertext)
    }

    fn delete_key(&self, alias: &str) -> KeystoreResult<()> {
        match std::fs::remove_file(self.key_path(alias)) {
            Ok(()) => {
                warn!("Deleted key for alias '{}'", alias);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keystore living only in process memory
#[derive(Default)]
pub struct MemoryKeystore {
    keys: Mutex<HashMap<String, [u8; KEY_LEN]>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, alias: &str) -> KeystoreResult<[u8; KEY_LEN]> {
        let keys = self.keys.lock().map_err(|e| KeystoreError::Task(e.to_string()))?;
        keys.get(alias)
            .copied()
            .ok_or_else(|| KeystoreError::KeyNotFound { alias: alias.to_string() })
    }
}

impl Keystore for MemoryKeystore {
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool> {
        let keys = self.keys.lock().map_err(|e| KeystoreError::Task(e.to_string()))?;
        Ok(keys.contains_key(alias))
    }

    fn generate_key(&self, alias: &str) -> KeystoreResult<()> {
        let mut keys = self.keys.lock().map_err(|e| KeystoreError::Task(e.to_string()))?;
        keys.insert(alias.to_string(), random_key());
        Ok(())
    }

    fn encrypt(&self, alias: &str, plaintext: &[u8]) -> KeystoreResult<SealedBox> {
        seal(&self.key(alias)?, plaintext)
    }

    fn decrypt(&self, alias: &str, iv: &[u8], ciphertext: &[u8]) -> KeystoreResult<Vec<u8>> {
        open(&self.key(alias)?, iv, ciphertext)
    }

    fn delete_key(&self, alias: &str) -> KeystoreResult<()> {
        let mut keys = self.keys.lock().map_err(|e| KeystoreError::Task(e.to_string()))?;
        keys.remove(alias);
        Ok(())
    }
}

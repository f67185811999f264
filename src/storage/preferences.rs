use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::PreferenceError;

pub type PrefResult<T> = Result<T, PreferenceError>;

/// Namespace qualifier applied to a preference key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Unscoped entry (anonymous mode, or data written before multi-user support)
    Global,
    /// Entry belonging to a signed-in user
    User(String),
}

impl Scope {
    /// Scope for an optional user id, falling back to global when signed out
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Scope::User(id.to_string()),
            _ => Scope::Global,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::User(id) => Some(id),
        }
    }

    /// Storage key for `base` in this scope: `{base}_{user_id}` or `{base}`
    pub fn qualify(&self, base: &str) -> String {
        match self {
            Scope::Global => base.to_string(),
            Scope::User(id) => format!("{}_{}", base, id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// A typed preference value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrefValue {
    Int(i64),
    Str(String),
    Bool(bool),
    StrSet(BTreeSet<String>),
}

impl PrefValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PrefValue::Int(_) => "int",
            PrefValue::Str(_) => "string",
            PrefValue::Bool(_) => "bool",
            PrefValue::StrSet(_) => "string set",
        }
    }
}

/// Durable key/value facility underneath the preference store.
///
/// Implementations must have committed a write by the time `put`/`remove`
/// return.
#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    async fn get(&self, partition: &str, key: &str) -> PrefResult<Option<PrefValue>>;

    async fn put(&self, partition: &str, key: &str, value: &PrefValue) -> PrefResult<()>;

    /// Remove a key. Returns whether it existed.
    async fn remove(&self, partition: &str, key: &str) -> PrefResult<bool>;

    /// Remove every key in a partition
    async fn clear(&self, partition: &str) -> PrefResult<()>;

    async fn contains(&self, partition: &str, key: &str) -> PrefResult<bool> {
        Ok(self.get(partition, key).await?.is_some())
    }
}

/// In-process backend for tests and hosts without a data directory
#[derive(Default)]
pub struct MemoryPreferences {
    entries: RwLock<HashMap<(String, String), PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceBackend for MemoryPreferences {
    async fn get(&self, partition: &str, key: &str) -> PrefResult<Option<PrefValue>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(partition.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, partition: &str, key: &str, value: &PrefValue) -> PrefResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert((partition.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    async fn remove(&self, partition: &str, key: &str) -> PrefResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&(partition.to_string(), key.to_string())).is_some())
    }

    async fn clear(&self, partition: &str) -> PrefResult<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|(p, _), _| p != partition);
        Ok(())
    }
}

/// Typed, scope-aware view over one partition of a preference backend
#[derive(Clone)]
pub struct PreferenceStore {
    backend: Arc<dyn PreferenceBackend>,
    partition: String,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>, partition: impl Into<String>) -> Self {
        Self {
            backend,
            partition: partition.into(),
        }
    }

    /// Read a raw value, migrating a legacy global entry into a user scope.
    ///
    /// A user-scoped miss falls back to the unscoped key once; if that holds a
    /// value it is copied into the scoped key before being returned, so every
    /// later read is served from the scoped entry.
    pub async fn get(&self, scope: &Scope, key: &str) -> PrefResult<Option<PrefValue>> {
        let scoped_key = scope.qualify(key);
        if let Some(value) = self.backend.get(&self.partition, &scoped_key).await? {
            return Ok(Some(value));
        }

        if matches!(scope, Scope::Global) {
            return Ok(None);
        }

        let Some(legacy) = self.backend.get(&self.partition, key).await? else {
            return Ok(None);
        };

        self.backend.put(&self.partition, &scoped_key, &legacy).await?;
        info!(
            "Migrated legacy preference '{}' into {} ({})",
            key, scope, self.partition
        );
        Ok(Some(legacy))
    }

    pub async fn put(&self, scope: &Scope, key: &str, value: PrefValue) -> PrefResult<()> {
        let scoped_key = scope.qualify(key);
        self.backend.put(&self.partition, &scoped_key, &value).await?;
        debug!("Stored {} preference '{}'", value.type_name(), scoped_key);
        Ok(())
    }

    pub async fn remove(&self, scope: &Scope, key: &str) -> PrefResult<bool> {
        self.backend.remove(&self.partition, &scope.qualify(key)).await
    }

    /// Whether the scoped key exists, without triggering migration
    pub async fn contains(&self, scope: &Scope, key: &str) -> PrefResult<bool> {
        self.backend.contains(&self.partition, &scope.qualify(key)).await
    }

    /// Remove every entry in this partition, all scopes included
    pub async fn clear(&self) -> PrefResult<()> {
        self.backend.clear(&self.partition).await?;
        info!("Cleared preference partition '{}'", self.partition);
        Ok(())
    }

    pub async fn get_int(&self, scope: &Scope, key: &str) -> PrefResult<Option<i64>> {
        match self.get(scope, key).await? {
            None => Ok(None),
            Some(PrefValue::Int(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "int", &other)),
        }
    }

    pub async fn put_int(&self, scope: &Scope, key: &str, value: i64) -> PrefResult<()> {
        self.put(scope, key, PrefValue::Int(value)).await
    }

    pub async fn get_string(&self, scope: &Scope, key: &str) -> PrefResult<Option<String>> {
        match self.get(scope, key).await? {
            None => Ok(None),
            Some(PrefValue::Str(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }

    pub async fn put_string(&self, scope: &Scope, key: &str, value: impl Into<String>) -> PrefResult<()> {
        self.put(scope, key, PrefValue::Str(value.into())).await
    }

    pub async fn get_bool(&self, scope: &Scope, key: &str) -> PrefResult<Option<bool>> {
        match self.get(scope, key).await? {
            None => Ok(None),
            Some(PrefValue::Bool(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "bool", &other)),
        }
    }

    pub async fn put_bool(&self, scope: &Scope, key: &str, value: bool) -> PrefResult<()> {
        self.put(scope, key, PrefValue::Bool(value)).await
    }

    pub async fn get_string_set(&self, scope: &Scope, key: &str) -> PrefResult<Option<BTreeSet<String>>> {
        match self.get(scope, key).await? {
            None => Ok(None),
            Some(PrefValue::StrSet(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(key, "string set", &other)),
        }
    }

    pub async fn put_string_set(&self, scope: &Scope, key: &str, value: BTreeSet<String>) -> PrefResult<()> {
        self.put(scope, key, PrefValue::StrSet(value)).await
    }
}

fn mismatch(key: &str, expected: &'static str, found: &PrefValue) -> PreferenceError {
    PreferenceError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<MemoryPreferences>, PreferenceStore) {
        let backend = Arc::new(MemoryPreferences::new());
        let store = PreferenceStore::new(backend.clone(), "test_prefs");
        (backend, store)
    }

    #[test]
    fn test_scope_qualify() {
        assert_eq!(Scope::Global.qualify("step_goal"), "step_goal");
        assert_eq!(Scope::User("u1".into()).qualify("step_goal"), "step_goal_u1");
        assert_eq!(Scope::for_user(Some("")), Scope::Global);
        assert_eq!(Scope::for_user(None), Scope::Global);
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let (_, store) = store();
        let scope = Scope::User("alice".into());

        store.put_int(&scope, "goal", 8000).await.unwrap();
        store.put_string(&scope, "name", "Alice").await.unwrap();
        store.put_bool(&scope, "flag", true).await.unwrap();
        let set: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        store.put_string_set(&scope, "tags", set.clone()).await.unwrap();

        assert_eq!(store.get_int(&scope, "goal").await.unwrap(), Some(8000));
        assert_eq!(store.get_string(&scope, "name").await.unwrap(), Some("Alice".to_string()));
        assert_eq!(store.get_bool(&scope, "flag").await.unwrap(), Some(true));
        assert_eq!(store.get_string_set(&scope, "tags").await.unwrap(), Some(set));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let (_, store) = store();
        store.put_int(&Scope::Global, "goal", 1).await.unwrap();

        let err = store.get_string(&Scope::Global, "goal").await.unwrap_err();
        assert!(matches!(err, PreferenceError::TypeMismatch { expected: "string", found: "int", .. }));
    }

    #[tokio::test]
    async fn test_legacy_value_migrates_on_read() {
        let (backend, store) = store();
        store.put_int(&Scope::Global, "goal", 6000).await.unwrap();

        let scope = Scope::User("bob".into());
        assert_eq!(store.get_int(&scope, "goal").await.unwrap(), Some(6000));
        assert!(backend.contains("test_prefs", "goal_bob").await.unwrap());

        // Legacy entry gone: the scoped copy still answers
        store.remove(&Scope::Global, "goal").await.unwrap();
        assert_eq!(store.get_int(&scope, "goal").await.unwrap(), Some(6000));
    }

    #[tokio::test]
    async fn test_scoped_value_shadows_legacy() {
        let (_, store) = store();
        let scope = Scope::User("bob".into());
        store.put_int(&Scope::Global, "goal", 6000).await.unwrap();
        store.put_int(&scope, "goal", 12000).await.unwrap();

        assert_eq!(store.get_int(&scope, "goal").await.unwrap(), Some(12000));
    }

    #[tokio::test]
    async fn test_clear_only_touches_partition() {
        let backend = Arc::new(MemoryPreferences::new());
        let a = PreferenceStore::new(backend.clone(), "a");
        let b = PreferenceStore::new(backend.clone(), "b");
        a.put_bool(&Scope::Global, "x", true).await.unwrap();
        b.put_bool(&Scope::Global, "x", true).await.unwrap();

        a.clear().await.unwrap();

        assert_eq!(a.get_bool(&Scope::Global, "x").await.unwrap(), None);
        assert_eq!(b.get_bool(&Scope::Global, "x").await.unwrap(), Some(true));
    }
}

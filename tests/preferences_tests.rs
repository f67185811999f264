mod common;

use anyhow::Result;
use common::TestEnvironment;
use std::collections::BTreeSet;
use std::sync::Arc;
use stride::storage::{Database, PrefValue, PreferenceBackend, PreferenceStore, Scope, PROFILE_PARTITION};

#[tokio::test]
async fn test_values_survive_reopen() -> Result<()> {
    let env = TestEnvironment::new().await?;
    let path = env.database.path().to_path_buf();
    let scope = Scope::User("alice".to_string());

    let prefs = env.profile_prefs();
    prefs.put_string(&scope, "user_name", "Alice").await?;
    prefs.put_int(&scope, "step_goal", 12_000).await?;
    prefs.put_bool(&scope, "name_needs_sync", true).await?;
    prefs
        .put_string_set(&scope, "tags", BTreeSet::from(["a".to_string(), "b".to_string()]))
        .await?;
    env.database.close().await;

    let reopened = Arc::new(Database::new(path).await?);
    let prefs = PreferenceStore::new(reopened.clone(), PROFILE_PARTITION);

    assert_eq!(prefs.get_string(&scope, "user_name").await?.as_deref(), Some("Alice"));
    assert_eq!(prefs.get_int(&scope, "step_goal").await?, Some(12_000));
    assert_eq!(prefs.get_bool(&scope, "name_needs_sync").await?, Some(true));
    assert_eq!(prefs.get_string_set(&scope, "tags").await?.map(|s| s.len()), Some(2));
    assert_eq!(reopened.count_entries(PROFILE_PARTITION).await?, 4);

    Ok(())
}

#[tokio::test]
async fn test_legacy_value_migrates_once() -> Result<()> {
    let env = TestEnvironment::new().await?;
    let prefs = env.profile_prefs();
    let scope = Scope::User("alice".to_string());

    prefs.put_string(&Scope::Global, "user_nickname", "Legacy").await?;

    // First scoped read falls back and copies forward
    assert_eq!(prefs.get_string(&scope, "user_nickname").await?.as_deref(), Some("Legacy"));
    assert!(
        env.database
            .contains(PROFILE_PARTITION, &scope.qualify("user_nickname"))
            .await?
    );

    // The copy stands on its own once the legacy entry is gone
    prefs.remove(&Scope::Global, "user_nickname").await?;
    assert_eq!(prefs.get_string(&scope, "user_nickname").await?.as_deref(), Some("Legacy"));

    Ok(())
}

#[tokio::test]
async fn test_scoped_value_shadows_legacy() -> Result<()> {
    let env = TestEnvironment::new().await?;
    let prefs = env.profile_prefs();
    let scope = Scope::User("bob".to_string());

    prefs.put_string(&Scope::Global, "user_name", "Old").await?;
    prefs.put_string(&scope, "user_name", "Bob").await?;

    assert_eq!(prefs.get_string(&scope, "user_name").await?.as_deref(), Some("Bob"));
    assert_eq!(prefs.get_string(&Scope::Global, "user_name").await?.as_deref(), Some("Old"));

    Ok(())
}

#[tokio::test]
async fn test_partitions_are_isolated() -> Result<()> {
    let env = TestEnvironment::new().await?;
    let profile = env.profile_prefs();
    let other = PreferenceStore::new(env.database.clone(), "other_prefs");

    profile.put_int(&Scope::Global, "counter", 1).await?;
    other.put_int(&Scope::Global, "counter", 2).await?;
    other.clear().await?;

    assert_eq!(profile.get_int(&Scope::Global, "counter").await?, Some(1));
    assert_eq!(other.get_int(&Scope::Global, "counter").await?, None);

    Ok(())
}

#[tokio::test]
async fn test_type_mismatch_is_reported() -> Result<()> {
    let env = TestEnvironment::new().await?;
    let prefs = env.profile_prefs();

    prefs.put(&Scope::Global, "step_goal", PrefValue::Str("lots".into())).await?;
    assert!(prefs.get_int(&Scope::Global, "step_goal").await.is_err());

    Ok(())
}

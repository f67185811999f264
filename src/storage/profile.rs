use tracing::debug;

use super::preferences::{PrefResult, PreferenceStore, Scope};
use super::sync_flags::SyncField;

const NAME_KEY: &str = "user_name";
const NICKNAME_KEY: &str = "user_nickname";
const INTERESTS_KEY: &str = "user_interests";
const PROFILE_PICTURE_KEY: &str = "profile_picture";
const STEP_GOAL_KEY: &str = "step_goal";

pub const DEFAULT_STEP_GOAL: i64 = 10_000;

/// Local value of a syncable profile field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Interests are exchanged as a bitmask code
    Code(i64),
}

impl FieldValue {
    /// Text form; codes render as decimal
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Code(code) => code.to_string(),
        }
    }

    /// Code form; text that is not a number reads as 0
    pub fn to_code(&self) -> i64 {
        match self {
            FieldValue::Text(text) => text.trim().parse().unwrap_or_default(),
            FieldValue::Code(code) => *code,
        }
    }
}

/// Local copy of the user's profile, kept in the profile partition
#[derive(Clone)]
pub struct ProfileStore {
    prefs: PreferenceStore,
}

impl ProfileStore {
    pub fn new(prefs: PreferenceStore) -> Self {
        Self { prefs }
    }

    pub async fn name(&self, scope: &Scope) -> PrefResult<Option<String>> {
        self.prefs.get_string(scope, NAME_KEY).await
    }

    pub async fn set_name(&self, scope: &Scope, name: &str) -> PrefResult<()> {
        self.prefs.put_string(scope, NAME_KEY, name).await
    }

    pub async fn nickname(&self, scope: &Scope) -> PrefResult<Option<String>> {
        self.prefs.get_string(scope, NICKNAME_KEY).await
    }

    pub async fn set_nickname(&self, scope: &Scope, nickname: &str) -> PrefResult<()> {
        self.prefs.put_string(scope, NICKNAME_KEY, nickname).await
    }

    pub async fn interests(&self, scope: &Scope) -> PrefResult<Option<i64>> {
        self.prefs.get_int(scope, INTERESTS_KEY).await
    }

    pub async fn set_interests(&self, scope: &Scope, code: i64) -> PrefResult<()> {
        self.prefs.put_int(scope, INTERESTS_KEY, code).await
    }

    /// Base64 encoded picture payload
    pub async fn profile_picture(&self, scope: &Scope) -> PrefResult<Option<String>> {
        self.prefs.get_string(scope, PROFILE_PICTURE_KEY).await
    }

    pub async fn set_profile_picture(&self, scope: &Scope, payload: &str) -> PrefResult<()> {
        self.prefs.put_string(scope, PROFILE_PICTURE_KEY, payload).await
    }

    pub async fn step_goal(&self, scope: &Scope) -> PrefResult<i64> {
        Ok(self.prefs.get_int(scope, STEP_GOAL_KEY).await?.unwrap_or(DEFAULT_STEP_GOAL))
    }

    pub async fn set_step_goal(&self, scope: &Scope, goal: i64) -> PrefResult<()> {
        self.prefs.put_int(scope, STEP_GOAL_KEY, goal).await
    }

    /// Current local value of a tracked field
    pub async fn field_value(&self, scope: &Scope, field: SyncField) -> PrefResult<Option<FieldValue>> {
        let value = match field {
            SyncField::Name => self.name(scope).await?.map(FieldValue::Text),
            SyncField::Nickname => self.nickname(scope).await?.map(FieldValue::Text),
            SyncField::ProfilePicture => self.profile_picture(scope).await?.map(FieldValue::Text),
            SyncField::Interests => self.interests(scope).await?.map(FieldValue::Code),
        };
        Ok(value)
    }

    /// Overwrite the local value of a tracked field
    pub async fn set_field_value(&self, scope: &Scope, field: SyncField, value: &FieldValue) -> PrefResult<()> {
        match field {
            SyncField::Name => self.set_name(scope, &value.to_text()).await?,
            SyncField::Nickname => self.set_nickname(scope, &value.to_text()).await?,
            SyncField::ProfilePicture => self.set_profile_picture(scope, &value.to_text()).await?,
            SyncField::Interests => self.set_interests(scope, value.to_code()).await?,
        }
        debug!("Local {} updated for {}", field, scope);
        Ok(())
    }
}

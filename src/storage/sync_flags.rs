use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::preferences::{PrefResult, PreferenceStore, Scope};

/// Profile fields whose local value is reconciled with the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncField {
    ProfilePicture,
    Interests,
    Name,
    Nickname,
}

impl SyncField {
    /// Every tracked field, in sweep order
    pub const ALL: [SyncField; 4] = [
        SyncField::ProfilePicture,
        SyncField::Interests,
        SyncField::Name,
        SyncField::Nickname,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncField::ProfilePicture => "profile_picture",
            SyncField::Interests => "interests",
            SyncField::Name => "name",
            SyncField::Nickname => "nickname",
        }
    }

    fn flag_key(&self) -> String {
        format!("{}_needs_sync", self.as_str())
    }
}

impl fmt::Display for SyncField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field "local value is ahead of remote" markers, scoped per user
#[derive(Clone)]
pub struct SyncFlagRegistry {
    prefs: PreferenceStore,
}

impl SyncFlagRegistry {
    pub fn new(prefs: PreferenceStore) -> Self {
        Self { prefs }
    }

    pub async fn mark_needing_sync(&self, scope: &Scope, field: SyncField, needs_sync: bool) -> PrefResult<()> {
        self.prefs.put_bool(scope, &field.flag_key(), needs_sync).await?;
        debug!("Sync flag for {} in {} set to {}", field, scope, needs_sync);
        Ok(())
    }

    /// Fields never touched read as not needing sync
    pub async fn does_field_need_sync(&self, scope: &Scope, field: SyncField) -> PrefResult<bool> {
        Ok(self.prefs.get_bool(scope, &field.flag_key()).await?.unwrap_or(false))
    }

    /// Fields currently flagged, in sweep order
    pub async fn dirty_fields(&self, scope: &Scope) -> PrefResult<Vec<SyncField>> {
        let mut dirty = Vec::new();
        for field in SyncField::ALL {
            if self.does_field_need_sync(scope, field).await? {
                dirty.push(field);
            }
        }
        Ok(dirty)
    }
}

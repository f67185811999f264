pub mod database;
pub mod preferences;
pub mod profile;
pub mod sync_flags;

pub use database::Database;
pub use preferences::{MemoryPreferences, PrefValue, PreferenceBackend, PreferenceStore, Scope};
pub use profile::{FieldValue, ProfileStore};
pub use sync_flags::{SyncField, SyncFlagRegistry};

/// Partition holding profile values and their sync flags
pub const PROFILE_PARTITION: &str = "user_profile_prefs";

/// Partition holding the encrypted refresh credential
pub const SECURE_PARTITION: &str = "secure_credentials";

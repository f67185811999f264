pub mod api;
pub mod coordinator;
pub mod service;

pub use api::{HttpProfileApi, RemoteProfile, RemoteProfileStore};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use service::{SyncEvent, SyncService, SyncStatus};

pub mod credential_store;
pub mod keystore;
pub mod remote;
pub mod session;

pub use credential_store::{CredentialStore, HealthStatus, LoadOutcome, DEFAULT_KEY_ALIAS};
pub use keystore::{FileKeystore, Keystore, MemoryKeystore};
pub use remote::{AuthSession, HttpAuthClient, RefreshResponse, RemoteAuth};
pub use session::{RestoreOutcome, SessionManager, SessionState};

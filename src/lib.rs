pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

pub use app::StrideCore;
pub use config::AppConfig;

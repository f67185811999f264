use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::auth::DEFAULT_KEY_ALIAS;
use crate::error::ConfigError;

const DEFAULT_API_URL: &str = "https://api.stride.fit/";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Settings file contents; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_url: Option<String>,
    api_key: Option<String>,
    data_dir: Option<PathBuf>,
    remote_timeout_secs: Option<u64>,
    sync_interval_secs: Option<u64>,
    key_alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Backend base URL, always ending in `/`
    pub api_url: Url,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    /// Upper bound on every remote auth/store call
    pub remote_timeout: Duration,
    pub sync_interval: Duration,
    pub key_alias: String,
}

impl AppConfig {
    /// Load `.env`, the config file and `STRIDE_*` overrides, in that order
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = match std::env::var("STRIDE_CONFIG") {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => project_dirs().map(|dirs| dirs.config_dir().join("config.toml")),
        };

        let file = match path {
            Some(path) if path.exists() => {
                info!("Loading config from {:?}", path);
                read_file(&path)?
            }
            _ => {
                debug!("No config file found, using defaults");
                ConfigFile::default()
            }
        };

        Self::resolve(file, |name| std::env::var(name).ok())
    }

    /// Parse settings from TOML text, ignoring the environment
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Self::resolve(file, |_| None)
    }

    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = env("STRIDE_API_URL")
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = parse_base_url(&api_url)?;

        let api_key = env("STRIDE_API_KEY").or(file.api_key).filter(|k| !k.is_empty());

        let data_dir = match env("STRIDE_DATA_DIR").map(PathBuf::from).or(file.data_dir) {
            Some(dir) => dir,
            None => project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(ConfigError::NoDataDir)?,
        };

        let remote_timeout_secs = match env("STRIDE_REMOTE_TIMEOUT_SECS") {
            Some(raw) => parse_secs("remote_timeout_secs", &raw)?,
            None => file.remote_timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
        };
        let sync_interval_secs = match env("STRIDE_SYNC_INTERVAL_SECS") {
            Some(raw) => parse_secs("sync_interval_secs", &raw)?,
            None => file.sync_interval_secs.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        };

        if remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "remote_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if sync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            api_url,
            api_key,
            data_dir,
            remote_timeout: Duration::from_secs(remote_timeout_secs),
            sync_interval: Duration::from_secs(sync_interval_secs),
            key_alias: file.key_alias.unwrap_or_else(|| DEFAULT_KEY_ALIAS.to_string()),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("stride.db")
    }

    pub fn keystore_dir(&self) -> PathBuf {
        self.data_dir.join("keystore")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("fit", "stride", "stride")
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    // Relative joins drop the last path segment unless the base ends in '/'
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| ConfigError::Invalid {
        field: "api_url",
        reason: e.to_string(),
    })
}

fn parse_secs(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("'{}' is not a number of seconds", raw),
    })
}

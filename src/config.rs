use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_ID: &str = "datachat";

/// Header the API server reads the caller's user id from.
pub const USER_ID_HEADER: &str = "user-id";

const ENV_PREFIX: &str = "DATACHAT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub chat_path: String,
    pub user_id: Option<String>,
    pub app_code: Option<String>,
    pub chat_mode: String,
    pub model_name: Option<String>,
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub incremental: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Bearer token for the API server. Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5670".to_string(),
            chat_path: "/api/v1/chat/completions".to_string(),
            user_id: None,
            app_code: None,
            chat_mode: "chat_normal".to_string(),
            model_name: None,
            temperature: 0.0,
            max_new_tokens: 4000,
            incremental: false,
            connect_timeout_secs: 5,
            request_timeout_secs: 300,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field("chat_path", &self.chat_path)
            .field("user_id", &self.user_id)
            .field("app_code", &self.app_code)
            .field("chat_mode", &self.chat_mode)
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("incremental", &self.incremental)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Config {
    /// Defaults, then the config file if present, then `DATACHAT_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".config")
            });
        config_dir.join(APP_ID).join("config.json")
    }

    pub fn data_path() -> PathBuf {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".local/share")
            });
        data_dir.join(APP_ID).join("datachat.db")
    }

    /// Overlay environment values. `lookup` is injected so tests do not
    /// touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = get("CHAT_PATH") {
            self.chat_path = v;
        }
        if let Some(v) = get("USER_ID") {
            self.user_id = Some(v);
        }
        if let Some(v) = get("APP_CODE") {
            self.app_code = Some(v);
        }
        if let Some(v) = get("CHAT_MODE") {
            self.chat_mode = v;
        }
        if let Some(v) = get("MODEL_NAME") {
            self.model_name = Some(v);
        }
        if let Some(v) = get("TEMPERATURE") {
            self.temperature = parse_value("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MAX_NEW_TOKENS") {
            self.max_new_tokens = parse_value("MAX_NEW_TOKENS", &v)?;
        }
        if let Some(v) = get("INCREMENTAL") {
            self.incremental = parse_value("INCREMENTAL", &v)?;
        }
        if let Some(v) = get("CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_value("CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("API_KEY") {
            if !v.is_empty() {
                self.api_key = Some(v);
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{}{}", ENV_PREFIX, key),
        value: value.to_string(),
    })
}

use std::time::Duration;

use thiserror::Error;

use crate::models::ImageStrategy;

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4-turbo";
const DEFAULT_PORT: u16 = 3000;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` keeps the server up but every chat turn fails as misconfigured.
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub image_strategy: ImageStrategy,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let image_strategy = match get("IMAGE_STRATEGY") {
            Some(raw) => raw.parse::<ImageStrategy>().map_err(|reason| ConfigError::InvalidValue {
                key: "IMAGE_STRATEGY",
                value: raw.clone(),
                reason,
            })?,
            None => ImageStrategy::default(),
        };

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            api_base_url: get("OPENAI_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            image_strategy,
            port,
        })
    }
}

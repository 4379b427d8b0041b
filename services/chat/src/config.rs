//! services/chat/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub news_api_token: Option<String>,
    pub chat_model: String,
    pub json_model: String,
    pub stt_model: String,
    pub default_voice: String,
    pub blob_dir: PathBuf,
    pub blob_base_url: String,
    /// Seconds between reminder due-check polls.
    pub reminder_poll_secs: u64,
    /// How many recent messages the companionship agent sees.
    pub history_window: usize,
    /// How many headlines one news summary covers.
    pub news_limit: usize,
    /// Fallback city when a weather query names no resolvable place.
    pub default_city: String,
    pub default_latitude: f64,
    pub default_longitude: f64,
    pub default_country: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let news_api_token = std::env::var("NEWS_API_TOKEN").ok();

        // --- Load Adapter-specific Settings ---
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let json_model =
            std::env::var("JSON_MODEL").unwrap_or_else(|_| "gpt-4-turbo-preview".to_string());
        let stt_model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let default_voice = std::env::var("DEFAULT_VOICE")
            .unwrap_or_else(|_| crate::agents::DEFAULT_VOICE.to_string());

        let blob_dir = std::env::var("BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./blobs"));
        let blob_base_url =
            std::env::var("BLOB_BASE_URL").unwrap_or_else(|_| "file://./blobs".to_string());

        let reminder_poll_secs = parse_var("REMINDER_POLL_SECS", 30)?;
        let history_window = parse_var("HISTORY_WINDOW", 10)?;
        let news_limit = parse_var("NEWS_LIMIT", 5)?;

        let default_city = std::env::var("DEFAULT_CITY").unwrap_or_else(|_| "Glasgow".to_string());
        let default_latitude = parse_var("DEFAULT_LATITUDE", 55.8617)?;
        let default_longitude = parse_var("DEFAULT_LONGITUDE", -4.2583)?;
        let default_country =
            std::env::var("DEFAULT_COUNTRY").unwrap_or_else(|_| "United Kingdom".to_string());

        Ok(Self {
            database_url,
            log_level,
            openai_api_key,
            news_api_token,
            chat_model,
            json_model,
            stt_model,
            default_voice,
            blob_dir,
            blob_base_url,
            reminder_poll_secs,
            history_window,
            news_limit,
            default_city,
            default_latitude,
            default_longitude,
            default_country,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

//! Environment-driven runtime configuration.

use std::env;
use std::sync::OnceLock;

use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the document vault server.
#[derive(Debug)]
pub struct Config {
    /// SQLite database file path.
    pub database_path: String,
    /// Directory where uploaded files are stored.
    pub upload_dir: String,
    /// API key for the Gemini extraction backend.
    pub gemini_api_key: String,
    /// Gemini model identifier used for extraction and categorization.
    pub gemini_model: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Optional override for the retry backoff unit, in seconds.
    pub extraction_backoff_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables, performing validation
    /// along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: load_env_optional("DOCVAULT_DB_PATH")
                .unwrap_or_else(|| "documents.db".to_string()),
            upload_dir: load_env_optional("DOCVAULT_UPLOAD_DIR")
                .unwrap_or_else(|| "uploads".to_string()),
            gemini_api_key: load_env("GEMINI_API_KEY")?,
            gemini_model: load_env_optional("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-1.5-flash-lite".to_string()),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            extraction_backoff_secs: load_env_optional("EXTRACTION_BACKOFF_SECS")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("EXTRACTION_BACKOFF_SECS".into()))
                })
                .transpose()?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        database_path = %config.database_path,
        upload_dir = %config.upload_dir,
        model = %config.gemini_model,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

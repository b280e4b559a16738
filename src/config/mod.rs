//! Configuration for the Eco Action backend and client.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Backend configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// JSON document used to seed an empty database
    pub seed_path: Option<PathBuf>,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("ECO_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("ECO_DB_PATH")
            .unwrap_or_else(|_| "./data/eco.sqlite".to_string())
            .into();

        let index_path = env::var("ECO_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let seed_path = env::var("ECO_SEED_PATH").ok().map(PathBuf::from);

        let bind_addr = parse_var("ECO_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("ECO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            seed_path,
            bind_addr,
            log_level,
        })
    }
}

/// Settings for talking to the backend from the client side.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    /// Retries for failed query fetches
    pub retries: u32,
    pub session_path: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base_url = env::var("ECO_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = env::var("ECO_API_PSK").ok().filter(|k| !k.is_empty());
        let timeout_secs: u64 = parse_var("ECO_HTTP_TIMEOUT_SECS", "10")?;
        let retries = parse_var("ECO_QUERY_RETRIES", "3")?;
        let session_path = env::var("ECO_SESSION_PATH")
            .unwrap_or_else(|_| "./data/session.json".to_string())
            .into();

        Ok(Self {
            base_url,
            api_key,
            request_timeout: Duration::from_secs(timeout_secs),
            retries,
            session_path,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

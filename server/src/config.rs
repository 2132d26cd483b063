//! Configuration management for the server.

use liquidata_engine::DEFAULT_TABLE;
use std::env;

/// Default listing page size.
pub const DEFAULT_PAGE_SIZE: usize = 14;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Table holding the liquidation notices
    pub record_table: String,
    /// `LISTEN` channel the change trigger notifies
    pub feed_channel: String,
    /// Listing page size when the request does not set one
    pub page_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let record_table = env::var("RECORD_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string());
        if !is_identifier(&record_table) {
            return Err(ConfigError::InvalidIdentifier("RECORD_TABLE", record_table));
        }

        let feed_channel =
            env::var("FEED_CHANNEL").unwrap_or_else(|_| format!("{}_changes", record_table));
        if !is_identifier(&feed_channel) {
            return Err(ConfigError::InvalidIdentifier("FEED_CHANNEL", feed_channel));
        }

        let page_size = match env::var("PAGE_SIZE") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidPageSize(raw)),
            },
            Err(_) => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            host,
            port,
            database_url,
            record_table,
            feed_channel,
            page_size,
        })
    }

    /// Configuration for tests and tools that never open a connection.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: String::new(),
            record_table: DEFAULT_TABLE.to_string(),
            feed_channel: format!("{}_changes", DEFAULT_TABLE),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Table and channel names are spliced into SQL, so only plain identifiers
/// are accepted.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid PAGE_SIZE value: {0}")]
    InvalidPageSize(String),

    #[error("{0} must be a plain SQL identifier, got {1:?}")]
    InvalidIdentifier(&'static str, String),
}

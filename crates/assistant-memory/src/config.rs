use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::memory_db::DbOptions;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub export_dir: PathBuf,
    pub history_limit: usize,
    pub search_limit: usize,
    pub api_host: String,
    pub api_port: u16,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("storage/agent.db"),
            pool_size: 8,
            busy_timeout_ms: 5000,
            export_dir: PathBuf::from("storage/exports"),
            history_limit: 50,
            search_limit: 20,
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Self {
            db_path: lookup("ASSISTANT_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            pool_size: parse_var(&lookup, "DB_POOL_SIZE", defaults.pool_size)?,
            busy_timeout_ms: parse_var(&lookup, "DB_BUSY_TIMEOUT_MS", defaults.busy_timeout_ms)?,
            export_dir: lookup("EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            history_limit: parse_var(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            search_limit: parse_var(&lookup, "SEARCH_LIMIT", defaults.search_limit)?,
            api_host: lookup("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_var(&lookup, "API_PORT", defaults.api_port)?,
            log_filter: lookup("ASSISTANT_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            pool_size: self.pool_size,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Pool Size: {}", self.pool_size);
        info!("- Busy Timeout: {}ms", self.busy_timeout_ms);
        info!("- Export Dir: {}", self.export_dir.display());
        info!("- History Limit: {}", self.history_limit);
        info!("- Search Limit: {}", self.search_limit);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Log Filter: {}", self.log_filter);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        None => Ok(default),
    }
}

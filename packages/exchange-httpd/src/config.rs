use std::env;
use std::fmt;
use std::path::Path;

use eyre::{eyre, Result, WrapErr};

#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
    pub exchange_base_url: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("http", &self.http)
            .finish()
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("failed to load .env file from {path}"))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let http = HttpConfig {
            bind_address: env::var("HTTPD_BIND_ADDRESS").unwrap_or_else(|_| default_bind_address()),
            port: env::var("HTTPD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_port),
            exchange_base_url: env::var("EXCHANGE_BASE_URL")
                .map_err(|_| eyre!("EXCHANGE_BASE_URL environment variable is required"))?,
        };

        Ok(Self { database, http })
    }
}

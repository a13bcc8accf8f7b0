use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};
use exchange_core::Amount;

#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub closer: CloserSettings,
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
pub struct CloserSettings {
    pub wire_granularity: Amount,
    pub exchange_base_url: String,
    pub batch_size: i64,
    pub idle_interval: Duration,
    /// `(payto_uri, wire_method)` pairs; the closing fee itself is not
    /// configured here, it comes from the exchange's published fee
    /// schedule and is looked up per reserve by wire method.
    pub wire_accounts: Vec<(String, String)>,
}

/// Parse `WIRE_ACCOUNTS`, formatted as comma-separated `payto_uri=method`
/// pairs, e.g. `payto://iban/DE1=iban,payto://x-taler-bank/2=x-taler-bank`.
fn parse_wire_accounts(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (payto_uri, method) = pair
                .split_once('=')
                .ok_or_else(|| eyre!("WIRE_ACCOUNTS entry '{pair}' must be 'payto_uri=method'"))?;
            Ok((payto_uri.to_string(), method.to_string()))
        })
        .collect()
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("closer", &self.closer)
            .finish()
    }
}

fn default_batch_size() -> i64 {
    1000
}

fn default_idle_interval_ms() -> u64 {
    60_000
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

        let wire_granularity_raw = env::var("WIRE_GRANULARITY")
            .map_err(|_| eyre!("WIRE_GRANULARITY environment variable is required (e.g. EUR:0.01)"))?;
        let wire_granularity: Amount = wire_granularity_raw
            .parse()
            .wrap_err("WIRE_GRANULARITY must be a valid amount, e.g. EUR:0.01")?;

        let wire_accounts_raw = env::var("WIRE_ACCOUNTS").map_err(|_| {
            eyre!(
                "WIRE_ACCOUNTS environment variable is required \
                 (e.g. payto://iban/DE1=iban)"
            )
        })?;
        let wire_accounts = parse_wire_accounts(&wire_accounts_raw)?;

        let closer = CloserSettings {
            wire_granularity,
            exchange_base_url: env::var("EXCHANGE_BASE_URL")
                .map_err(|_| eyre!("EXCHANGE_BASE_URL environment variable is required"))?,
            batch_size: env::var("CLOSER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_batch_size),
            idle_interval: Duration::from_millis(
                env::var("CLOSER_IDLE_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_idle_interval_ms),
            ),
            wire_accounts,
        };

        Ok(Self { database, closer })
    }
}

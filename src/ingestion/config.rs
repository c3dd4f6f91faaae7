//! Run configuration, built once at process start and passed down

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::Region;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "https://servicodados.ibge.gov.br/api/v1/bngb/uf/{uf}/nomesgeograficos";

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// URL with a `{uf}` placeholder for the region code
    pub endpoint_template: String,
    pub regions: Vec<Region>,
    pub csv_dir: PathBuf,
    pub parquet_dir: PathBuf,
    /// Pause after each region of the collection pass
    pub throttle: Duration,
    pub http_timeout: Duration,
    pub database: DatabaseConfig,
}

/// Connection parameters for the relational store
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Full connection string; wins over the individual fields when set
    pub url: Option<String>,
}

// Keep the password out of logs
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("url", &self.url.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.url {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| IngestError::Config(format!("DATABASE_URL: {}", e))),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .database(&self.database)
                .username(&self.username)
                .password(&self.password)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; missing keys fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let endpoint_template = var("BNGB_ENDPOINT", DEFAULT_ENDPOINT);
        if !endpoint_template.contains("{uf}") {
            return Err(IngestError::Config(
                "BNGB_ENDPOINT must contain a {uf} placeholder".to_string(),
            ));
        }

        let regions = match lookup("BNGB_REGIONS") {
            Some(list) => parse_regions(&list)?,
            None => Region::ALL.to_vec(),
        };

        Ok(Config {
            endpoint_template,
            regions,
            csv_dir: var("CSV_DIR", "dados/csv").into(),
            parquet_dir: var("PARQUET_DIR", "dados/parquet").into(),
            throttle: Duration::from_millis(parse_number(&var("THROTTLE_MS", "1000"), "THROTTLE_MS")?),
            http_timeout: Duration::from_secs(parse_number(
                &var("HTTP_TIMEOUT_SECS", "60"),
                "HTTP_TIMEOUT_SECS",
            )?),
            database: DatabaseConfig {
                host: var("DB_HOST", "localhost"),
                port: parse_number(&var("DB_PORT", "5432"), "DB_PORT")?,
                database: var("DB_NAME", "bngb"),
                username: var("DB_USER", "postgres"),
                password: var("DB_PASSWORD", "postgres"),
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            },
        })
    }
}

/// Comma or whitespace separated region codes
pub fn parse_regions(list: &str) -> Result<Vec<Region>> {
    let regions = list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|code| !code.is_empty())
        .map(|code| code.parse::<Region>())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if regions.is_empty() {
        return Err(IngestError::Config("BNGB_REGIONS is empty".to_string()));
    }
    Ok(regions)
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{} must be a number, got '{}'", key, value)))
}

use crate::cache::StalePolicy;
use std::env;

/// Item source backend selection
#[derive(Clone, Debug, PartialEq)]
pub enum SourceType {
    /// Simulated expensive generation (default, no external services)
    Simulated,
    /// MySQL `items` table (requires the `mysql` cargo feature)
    MySql,
}

/// Connection settings for the MySQL-backed source
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: u32,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// TTL for the `/items-db-cache` endpoint in milliseconds; 0 means
    /// "cache forever until explicit reset"
    pub cache_ttl_ms: u64,
    /// Synthetic batch size for the simulated source
    pub item_count: u32,
    /// Behavior on regeneration failure / in-flight regeneration
    pub stale_policy: StalePolicy,
    /// Item source backend
    pub source: SourceType,
    /// MySQL settings (used when source = MySql)
    pub db: DbConfig,
}

impl Config {
    /// Load configuration from environment variables.
    /// Every variable has a local-dev default; nothing is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        // 60s default: long enough to cover a 10s measurement window
        // plus warmup in one cache generation.
        let cache_ttl_ms = env::var("CACHE_TTL_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse()?;

        let item_count = env::var("ITEM_COUNT")
            .unwrap_or_else(|_| "100".to_string())
            .parse()?;

        let stale_policy = match env::var("STALE_POLICY")
            .unwrap_or_else(|_| "fail-closed".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-open" => StalePolicy::FailOpen,
            _ => StalePolicy::FailClosed,
        };

        let source = match env::var("ITEM_SOURCE")
            .unwrap_or_else(|_| "simulated".to_string())
            .to_lowercase()
            .as_str()
        {
            "mysql" | "db" => SourceType::MySql,
            _ => SourceType::Simulated,
        };

        let db = DbConfig {
            host: env::var("MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            user: env::var("MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
            password: env::var("MYSQL_PASSWORD").unwrap_or_else(|_| "password".to_string()),
            database: env::var("MYSQL_DB").unwrap_or_else(|_| "items".to_string()),
            pool_size: env::var("MYSQL_POOL_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
        };

        Ok(Config {
            port,
            cache_ttl_ms,
            item_count,
            stale_policy,
            source,
            db,
        })
    }
}

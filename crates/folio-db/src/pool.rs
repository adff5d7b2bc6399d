//! Database connection pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use folio_core::{Error, Result};

/// Pool sizing and acquire timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Read `DB_MAX_CONNECTIONS` / `DB_MIN_CONNECTIONS` /
    /// `DB_CONNECT_TIMEOUT_SECS`, keeping defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            max_connections: number("DB_MAX_CONNECTIONS")
                .map(|v| v.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_connections),
            min_connections: number("DB_MIN_CONNECTIONS")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.min_connections),
            acquire_timeout: number("DB_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        }
    }
}

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> PoolConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PoolConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_pool_config_unset_keeps_defaults() {
        assert_eq!(from_pairs(&[]), PoolConfig::default());
    }

    #[test]
    fn test_pool_config_reads_overrides() {
        let config = from_pairs(&[
            ("DB_MAX_CONNECTIONS", "20"),
            ("DB_MIN_CONNECTIONS", " 5 "),
            ("DB_CONNECT_TIMEOUT_SECS", "60"),
        ]);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_pool_config_rejects_bad_values() {
        let config = from_pairs(&[("DB_MAX_CONNECTIONS", "0"), ("DB_MIN_CONNECTIONS", "many")]);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.min_connections, PoolConfig::default().min_connections);
    }
}

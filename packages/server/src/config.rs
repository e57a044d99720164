//! Environment-driven server configuration.

use std::time::Duration;

use mica_database::db::DEFAULT_DATABASE_URL;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TILE_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_TILE_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `PostgreSQL` connection string (`DATABASE_URL`).
    pub database_url: String,
    /// Interface to listen on (`BIND_ADDR`).
    pub bind_addr: String,
    /// Port to listen on (`PORT`).
    pub port: u16,
    /// Upper bound on a single store query (`STATEMENT_TIMEOUT_SECS`).
    pub statement_timeout: Duration,
    /// How long encoded tiles are cached (`TILE_CACHE_TTL_SECS`, `0`
    /// disables the cache).
    pub tile_cache_ttl: Duration,
    /// Upper bound on cached tiles (`TILE_CACHE_MAX_ENTRIES`, `0` disables
    /// the cache).
    pub tile_cache_max_entries: u64,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults
    /// for missing or malformed values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            statement_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STATEMENT_TIMEOUT_SECS",
                DEFAULT_STATEMENT_TIMEOUT_SECS,
            )),
            tile_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "TILE_CACHE_TTL_SECS",
                DEFAULT_TILE_CACHE_TTL_SECS,
            )),
            tile_cache_max_entries: parse_or(
                &lookup,
                "TILE_CACHE_MAX_ENTRIES",
                DEFAULT_TILE_CACHE_MAX_ENTRIES,
            ),
        }
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    let Some(raw) = lookup(name) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        log::warn!("Ignoring malformed {name}={raw:?}, using {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.tile_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.tile_cache_max_entries, 10_000);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = config(&[
            ("BIND_ADDR", "0.0.0.0"),
            ("PORT", "9000"),
            ("STATEMENT_TIMEOUT_SECS", "soon"),
            ("TILE_CACHE_TTL_SECS", "0"),
            ("TILE_CACHE_MAX_ENTRIES", "-5"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert!(config.tile_cache_ttl.is_zero());
        assert_eq!(config.tile_cache_max_entries, 10_000);
    }

    #[test]
    fn reads_tile_cache_capacity() {
        let config = config(&[("TILE_CACHE_MAX_ENTRIES", " 250 ")]);
        assert_eq!(config.tile_cache_max_entries, 250);
    }
}

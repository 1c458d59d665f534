// =============================================================================
// CONFIGURATION MODULE
// =============================================================================
// Environment-driven settings for the flow service. Only WAREHOUSE_API_URL is
// required; a value that is set but does not parse aborts startup.
// =============================================================================

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// -----------------------------------------------------------------------------
// CONFIG STRUCT
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 8003)
    pub port: u16,

    /// Base URL of the warehouse backend, e.g. http://backend:8080
    pub warehouse_api_url: String,

    /// Bearer token handed over by the session provider, forwarded as-is
    pub warehouse_api_token: Option<String>,

    /// Redis connection URL for the item lookup cache.
    /// Unset disables caching.
    pub redis_url: Option<String>,

    /// How long a cached item lookup stays valid (default: 300s)
    pub item_cache_ttl_secs: u64,

    /// Repeated reads of the same code inside this window are ignored (default: 500ms)
    pub scan_delay_ms: u64,

    /// Close the camera step after the first accepted read (default: true)
    pub stop_on_scan: bool,

    /// Flow sessions idle for longer than this are dropped (default: 1800s)
    pub session_idle_timeout_secs: u64,
}

impl Config {
    // -------------------------------------------------------------------------
    // LOAD CONFIGURATION FROM ENVIRONMENT
    // -------------------------------------------------------------------------
    /// Creates a Config by reading environment variables.
    ///
    /// # Returns
    /// - `Ok(Config)` if all required variables are set
    /// - `Err` if a required variable is missing or a value does not parse
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: parse_or("PORT", 8003)?,

            // Required - no default value
            warehouse_api_url: env::var("WAREHOUSE_API_URL")
                .context("WAREHOUSE_API_URL environment variable is required")?
                .trim_end_matches('/')
                .to_string(),

            warehouse_api_token: optional("WAREHOUSE_API_TOKEN"),
            redis_url: optional("REDIS_URL"),
            item_cache_ttl_secs: parse_or("ITEM_CACHE_TTL_SECS", 300)?,
            scan_delay_ms: parse_or("SCAN_DELAY_MS", 500)?,
            stop_on_scan: parse_or("STOP_ON_SCAN", true)?,
            session_idle_timeout_secs: parse_or("SESSION_IDLE_TIMEOUT_SECS", 1800)?,
        })
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

/// Reads `name`, treating unset and blank the same
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {name}")),
        None => Ok(default),
    }
}

// =============================================================================
// TESTS
// =============================================================================
// Both cases run in one test: they share process-wide environment variables.
#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const VARS: [&str; 8] = [
        "PORT",
        "WAREHOUSE_API_URL",
        "WAREHOUSE_API_TOKEN",
        "REDIS_URL",
        "ITEM_CACHE_TTL_SECS",
        "SCAN_DELAY_MS",
        "STOP_ON_SCAN",
        "SESSION_IDLE_TIMEOUT_SECS",
    ];

    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }

        // Missing backend URL is fatal
        assert!(Config::from_env().is_err());

        // Defaults
        env::set_var("WAREHOUSE_API_URL", "http://backend:8080/");
        let config = Config::from_env().expect("Failed to load config");
        assert_eq!(config.port, 8003);
        assert_eq!(config.warehouse_api_url, "http://backend:8080");
        assert!(config.redis_url.is_none());
        assert_eq!(config.scan_delay(), Duration::from_millis(500));
        assert!(config.stop_on_scan);

        // Overrides
        env::set_var("PORT", "9000");
        env::set_var("REDIS_URL", "redis://localhost:6379");
        env::set_var("SCAN_DELAY_MS", "1200");
        env::set_var("STOP_ON_SCAN", "false");
        let config = Config::from_env().expect("Failed to load config");
        assert_eq!(config.port, 9000);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.scan_delay_ms, 1200);
        assert!(!config.stop_on_scan);

        // Garbage is rejected
        env::set_var("SCAN_DELAY_MS", "soon");
        assert!(Config::from_env().is_err());

        for var in VARS {
            env::remove_var(var);
        }
    }
}

//! Configuration Module
//!
//! Server settings come from environment variables; cache behaviour comes from
//! a JSON document deserialized into [`CacheOptions`].

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::{CacheError, Result};

/// Default TTL applied when a route does not name one
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Path to the JSON cache options file, if any
    pub cache_config: Option<PathBuf>,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_CONFIG` - Path to a JSON cache options file (default: none)
    /// - `CLEANUP_INTERVAL` - Expiry sweep frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            cache_config: env::var("CACHE_CONFIG").ok().map(PathBuf::from),
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }

    /// Loads the cache options named by `cache_config`, or the defaults.
    pub fn load_cache_options(&self) -> Result<CacheOptions> {
        match &self.cache_config {
            Some(path) => CacheOptions::from_file(path),
            None => Ok(CacheOptions::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache_config: None,
            cleanup_interval: 1,
        }
    }
}

// == Cache Options ==
/// Recognized cache options.
///
/// `routes` keeps declaration order (serde_json is built with `preserve_order`),
/// which route resolution depends on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    /// Route pattern -> policy map
    pub routes: Option<Map<String, Value>>,
    /// TTL for routes configured with `true` or without a timeout
    pub default_timeout_ms: u64,
    /// Hit count -> TTL table for `"increasing"` routes
    pub increasing: Option<Map<String, Value>>,
    /// Request headers that distinguish response variants
    pub vary: Option<Vec<String>>,
    /// Serve from cache even when the request says `Cache-Control: no-cache`
    pub ignore_no_cache: bool,
    /// Global key namespace
    pub cache_key_prefix: Option<String>,
    /// Responses with smaller bodies are not stored
    #[serde(alias = "minimumSize")]
    pub minimum_body_size: usize,
    /// Remote store selection
    pub external: Option<ExternalConfig>,
    /// Verbose diagnostics
    pub debug: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            routes: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            increasing: None,
            vary: None,
            ignore_no_cache: false,
            cache_key_prefix: None,
            minimum_body_size: 0,
            external: None,
            debug: false,
        }
    }
}

impl CacheOptions {
    /// Parses options from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Converts an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Reads and parses a JSON options file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Returns the configured routes, or the catch-all `{"*": "increasing"}`.
    pub fn route_map(&self) -> Map<String, Value> {
        match &self.routes {
            Some(routes) => routes.clone(),
            None => {
                let mut routes = Map::new();
                routes.insert("*".to_string(), Value::String("increasing".into()));
                routes
            }
        }
    }

    /// Returns the vary header list, defaulting to `Accept-Encoding`.
    pub fn vary_headers(&self) -> Vec<String> {
        self.vary
            .clone()
            .unwrap_or_else(|| vec!["Accept-Encoding".to_string()])
    }
}

// == External Store ==
/// Which driver backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    Memory,
    #[serde(alias = "redis")]
    Remote,
}

/// Remote store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalConfig {
    #[serde(rename = "type")]
    pub driver: DriverType,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Swap to the in-process driver after terminal connection failure
    pub fallback: bool,
    /// Consecutive failed connection attempts before giving up
    pub connect_retry_count: u32,
    /// Base delay between connection attempts, doubled on every retry
    pub connect_backoff_ms: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            driver: DriverType::Remote,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            fallback: true,
            connect_retry_count: 3,
            connect_backoff_ms: 100,
        }
    }
}

impl ExternalConfig {
    /// Connection URL in `redis://` form, with the password percent-encoded.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("redis://{}:{}/", self.host, self.port)).map_err(|e| {
            CacheError::Config(format!(
                "invalid remote address {}:{}: {}",
                self.host, self.port, e
            ))
        })?;
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| {
                CacheError::Config(format!("remote address {} cannot carry a password", self.host))
            })?;
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert!(config.cache_config.is_none());
        assert_eq!(config.cleanup_interval, 1);
    }

    #[test]
    fn test_config_from_env_defaults() {
        env::remove_var("SERVER_PORT");
        env::remove_var("CACHE_CONFIG");
        env::remove_var("CLEANUP_INTERVAL");

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert!(config.cache_config.is_none());
        assert_eq!(config.cleanup_interval, 1);
    }

    #[test]
    fn test_options_defaults() {
        let options = CacheOptions::from_json_str("{}").unwrap();
        assert_eq!(options.default_timeout_ms, 5000);
        assert!(!options.ignore_no_cache);
        assert_eq!(options.vary_headers(), vec!["Accept-Encoding".to_string()]);

        let routes = options.route_map();
        assert_eq!(routes.get("*"), Some(&json!("increasing")));
    }

    #[test]
    fn test_routes_keep_declaration_order() {
        let options = CacheOptions::from_json_str(
            r#"{"routes": {"/z": true, "/a": 100, "/m/:id": "increasing"}}"#,
        )
        .unwrap();

        let keys: Vec<&String> = options.routes.as_ref().unwrap().keys().collect();
        assert_eq!(keys, vec!["/z", "/a", "/m/:id"]);
    }

    #[test]
    fn test_external_defaults_and_url() {
        let options = CacheOptions::from_value(json!({
            "external": { "type": "remote", "password": "hunter2" }
        }))
        .unwrap();

        let external = options.external.unwrap();
        assert_eq!(external.driver, DriverType::Remote);
        assert!(external.fallback);
        assert_eq!(external.connect_retry_count, 3);
        assert_eq!(external.url().unwrap().as_str(), "redis://:hunter2@127.0.0.1:6379/");

        let plain = ExternalConfig {
            password: None,
            ..external
        };
        assert_eq!(plain.url().unwrap().as_str(), "redis://127.0.0.1:6379/");
    }

    #[test]
    fn test_url_encodes_password() {
        let external = ExternalConfig {
            password: Some("p@ss/w:rd".to_string()),
            ..ExternalConfig::default()
        };

        let url = external.url().unwrap();

        assert_eq!(url.password(), Some("p%40ss%2Fw%3Ard"));
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(6379));
    }

    #[test]
    fn test_url_rejects_bad_host() {
        let external = ExternalConfig {
            host: "bad host/".to_string(),
            ..ExternalConfig::default()
        };
        assert!(matches!(external.url(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_minimum_size_alias() {
        let options = CacheOptions::from_value(json!({ "minimumSize": 64 })).unwrap();
        assert_eq!(options.minimum_body_size, 64);
    }
}

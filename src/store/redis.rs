//! Redis Client Module
//!
//! [`RemoteClient`] over `redis::aio::ConnectionManager`. Requires the
//! `redis` feature flag.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::RedisError;
use tracing::debug;

use crate::config::ExternalConfig;
use crate::error::{CacheError, Result};
use crate::store::remote::RemoteClient;

/// Keys fetched per SCAN round trip
const SCAN_COUNT: usize = 100;

// == Redis Client ==
pub struct RedisClient {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl RedisClient {
    /// Creates an unconnected client; the URL is validated here.
    pub fn new(config: &ExternalConfig) -> Result<Self> {
        let client = redis::Client::open(config.url()?.as_str())
            .map_err(|e| CacheError::Config(format!("invalid redis address: {}", e)))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    fn conn(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| CacheError::Connection("not connected".to_string()))
    }
}

/// Maps failures that mean the server is unreachable to `Connection`.
fn classify(command: &str, e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        CacheError::Connection(format!("redis {} failed: {}", command, e))
    } else {
        CacheError::Driver(format!("redis {} failed: {}", command, e))
    }
}

#[async_trait]
impl RemoteClient for RedisClient {
    async fn connect(&self) -> Result<()> {
        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| classify("connect", e))?;
        *self.connection.lock() = Some(manager);
        debug!("redis connection established");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify("GET", e))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| classify("SET", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify("EXISTS", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn()?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| classify("PEXPIRE", e))
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| classify("DEL", e))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // cursor 0 ends the iteration
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify("SCAN", e))?;

            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = pattern, found = found.len(), "redis key lookup");
        Ok(found)
    }
}

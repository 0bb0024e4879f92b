//! Store Module
//!
//! Facade over the backing drivers. Selects the in-process or remote driver
//! from configuration and swaps to memory, once, when the remote driver
//! reports terminal failure.

pub mod driver;
pub mod glob;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod remote;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{CacheOptions, DriverType, ExternalConfig};
use crate::error::Result;
use crate::policy::ExpirationTable;

pub use driver::{DriverKind, KeySelector, StoreDriver};
pub use glob::{escape, has_glob, Glob};
pub use memory::MemoryDriver;
pub use remote::{Health, RemoteClient, RemoteDriver, RetryPolicy};

// == Store ==
#[derive(Debug)]
pub struct Store {
    active: RwLock<Arc<dyn StoreDriver>>,
    /// Health of the remote driver, absent for memory-only stores
    health: Option<watch::Receiver<Health>>,
    fallback_enabled: bool,
    demoted: AtomicBool,
    /// TTL decided for the next write of each base key
    expirations: ExpirationTable,
    default_ttl_ms: u64,
}

impl Store {
    /// In-process store.
    pub fn memory(default_ttl_ms: u64) -> Self {
        Self::from_driver(Arc::new(MemoryDriver::new()), None, false, default_ttl_ms)
    }

    /// Builds the store described by `options.external`.
    pub async fn connect(options: &CacheOptions) -> Result<Self> {
        let default_ttl_ms = options.default_timeout_ms;
        match &options.external {
            Some(external) if external.driver == DriverType::Remote => {
                Self::connect_remote(external, default_ttl_ms).await
            }
            _ => Ok(Self::memory(default_ttl_ms)),
        }
    }

    #[cfg(feature = "redis")]
    async fn connect_remote(external: &ExternalConfig, default_ttl_ms: u64) -> Result<Self> {
        let client = self::redis::RedisClient::new(external)?;
        Ok(Self::with_remote(Arc::new(client), external, default_ttl_ms).await)
    }

    #[cfg(not(feature = "redis"))]
    async fn connect_remote(external: &ExternalConfig, default_ttl_ms: u64) -> Result<Self> {
        if external.fallback {
            warn!("remote store requested but the redis feature is disabled, using memory");
            Ok(Self::memory(default_ttl_ms))
        } else {
            Err(crate::error::CacheError::Config(
                "remote store requires the redis feature".to_string(),
            ))
        }
    }

    /// Store backed by `client`, connected with the configured retry policy.
    pub async fn with_remote(
        client: Arc<dyn RemoteClient>,
        external: &ExternalConfig,
        default_ttl_ms: u64,
    ) -> Self {
        info!(host = %external.host, port = external.port, "using remote store for caching");
        let (driver, health) =
            RemoteDriver::connect(client, RetryPolicy::from_config(external)).await;
        Self::from_driver(Arc::new(driver), Some(health), external.fallback, default_ttl_ms)
    }

    fn from_driver(
        driver: Arc<dyn StoreDriver>,
        health: Option<watch::Receiver<Health>>,
        fallback_enabled: bool,
        default_ttl_ms: u64,
    ) -> Self {
        Self {
            active: RwLock::new(driver),
            health,
            fallback_enabled,
            demoted: AtomicBool::new(false),
            expirations: ExpirationTable::new(),
            default_ttl_ms,
        }
    }

    /// Active driver, after applying a pending fallback.
    fn driver(&self) -> Arc<dyn StoreDriver> {
        if self.should_demote() {
            let mut active = self.active.write();
            if !self.demoted.load(Ordering::Acquire) {
                warn!("remote store failed, falling back to memory");
                *active = Arc::new(MemoryDriver::new());
                self.demoted.store(true, Ordering::Release);
            }
        }
        self.active.read().clone()
    }

    fn should_demote(&self) -> bool {
        match &self.health {
            Some(health) => {
                self.fallback_enabled
                    && !self.demoted.load(Ordering::Acquire)
                    && *health.borrow() == Health::Failed
            }
            None => false,
        }
    }

    pub fn kind(&self) -> DriverKind {
        self.driver().kind()
    }

    /// True once the store has permanently switched to memory.
    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::Acquire)
    }

    pub fn expirations(&self) -> &ExpirationTable {
        &self.expirations
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    fn ttl_for(&self, key: &str) -> Duration {
        Duration::from_millis(self.expirations.get(key).unwrap_or(self.default_ttl_ms))
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.driver().has(key).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.driver().get(key).await
    }

    pub async fn get_buffer(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.driver().get_buffer(key).await
    }

    /// Writes one key. Without an explicit TTL the expiration table entry
    /// for the key is used, then the default.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(key));
        self.driver().set(key, value, ttl).await
    }

    /// Writes related keys sharing the TTL recorded for `base_key`.
    pub async fn set_multiple(&self, base_key: &str, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        let ttl = self.ttl_for(base_key);
        self.driver().set_multiple(entries, ttl).await
    }

    pub async fn remove(&self, selector: impl Into<KeySelector>) -> Result<usize> {
        let selector = selector.into();
        self.driver().remove(&selector).await
    }

    /// Drops expired entries and stale TTL assignments. Returns the number
    /// of store entries removed.
    pub async fn purge_expired(&self) -> usize {
        let stale = self.expirations.purge();
        if stale > 0 {
            debug!(stale = stale, "stale TTL assignments dropped");
        }
        self.driver().purge_expired().await
    }
}

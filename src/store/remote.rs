//! Remote Driver Module
//!
//! Store backed by a remote key-value server. TTLs use the server's native
//! expiry. Connection health is published on a watch channel so the store
//! facade can demote itself to memory after a terminal failure.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ExternalConfig;
use crate::error::Result;
use crate::store::driver::{DriverKind, KeySelector, StoreDriver};
use crate::store::glob::{has_glob, Glob};

// == Remote Client ==
/// Network client of the remote store.
///
/// Errors that mean the server is unreachable must be reported as
/// `CacheError::Connection`; anything else is treated as an operation failure.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Makes one connection attempt.
    async fn connect(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize>;
    /// Keys matching a server-side pattern (`*`, `?`, `\x`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

// == Health ==
/// Connection state published by a [`RemoteDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Connecting,
    Healthy,
    /// Retries exhausted; the driver will not recover on its own
    Failed,
}

// == Retry Policy ==
/// Bounded exponential backoff for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExternalConfig) -> Self {
        Self {
            max_attempts: config.connect_retry_count.max(1),
            base_delay: Duration::from_millis(config.connect_backoff_ms),
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// == Remote Driver ==
pub struct RemoteDriver {
    client: Arc<dyn RemoteClient>,
    retry: RetryPolicy,
    health: watch::Sender<Health>,
    reconnecting: AtomicBool,
}

impl fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("retry", &self.retry)
            .field("health", &*self.health.borrow())
            .finish()
    }
}

impl RemoteDriver {
    /// Connects with bounded retry and returns the driver together with the
    /// receiver of its health signal. When every attempt fails the signal is
    /// already `Failed` on return.
    pub async fn connect(
        client: Arc<dyn RemoteClient>,
        retry: RetryPolicy,
    ) -> (Self, watch::Receiver<Health>) {
        let (health, receiver) = watch::channel(Health::Connecting);
        let driver = Self {
            client,
            retry,
            health,
            reconnecting: AtomicBool::new(false),
        };
        driver.establish().await;
        (driver, receiver)
    }

    pub fn health(&self) -> Health {
        *self.health.borrow()
    }

    async fn establish(&self) -> bool {
        for attempt in 1..=self.retry.max_attempts {
            match self.client.connect().await {
                Ok(()) => {
                    info!(attempt = attempt, "connected to remote store");
                    self.health.send_replace(Health::Healthy);
                    return true;
                }
                Err(e) => {
                    warn!(attempt = attempt, max = self.retry.max_attempts, error = %e, "remote store connection failed");
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        warn!(attempts = self.retry.max_attempts, "remote store unreachable, giving up");
        self.health.send_replace(Health::Failed);
        false
    }

    /// Passes a client result through, starting a reconnect cycle when it
    /// reports lost connectivity. The failed operation itself is not retried.
    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection()
                && self.health() == Health::Healthy
                && !self.reconnecting.swap(true, Ordering::AcqRel)
            {
                warn!(error = %e, "remote store connection lost, reconnecting");
                self.health.send_replace(Health::Connecting);
                self.establish().await;
                self.reconnecting.store(false, Ordering::Release);
            }
        }
        result
    }

    async fn matching_keys(&self, glob: &Glob) -> Result<Vec<String>> {
        let mut found = BTreeSet::new();
        for pattern in glob.expand() {
            let keys = self.observe(self.client.keys(&pattern).await).await?;
            found.extend(keys.into_iter().filter(|key| glob.is_match(key)));
        }
        Ok(found.into_iter().collect())
    }
}

#[async_trait]
impl StoreDriver for RemoteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Remote
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.observe(self.client.exists(key).await).await
    }

    async fn get_buffer(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.observe(self.client.get(key).await).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "setting new item in remote store");
        self.observe(self.client.set(key, &value).await).await?;

        // A value whose expiry failed must not be left without a TTL
        if let Err(e) = self.client.expire(key, ttl).await {
            if let Err(cleanup) = self.client.del(&[key.to_string()]).await {
                warn!(key = key, error = %cleanup, "failed to drop value after expiry error");
            }
            return self.observe(Err(e)).await;
        }
        Ok(())
    }

    async fn remove(&self, selector: &KeySelector) -> Result<usize> {
        let doomed: Vec<String> = match selector {
            KeySelector::All => self.observe(self.client.keys("*").await).await?,
            KeySelector::Keys(keys) => {
                let mut doomed = BTreeSet::new();
                for key in keys {
                    if has_glob(key) {
                        doomed.extend(self.matching_keys(&Glob::new(key)?).await?);
                    } else {
                        doomed.insert(key.clone());
                    }
                }
                doomed.into_iter().collect()
            }
        };

        if doomed.is_empty() {
            return Ok(0);
        }
        let removed = self.observe(self.client.del(&doomed).await).await?;
        debug!(selector = ?selector, removed = removed, "deleting from remote store");
        Ok(removed)
    }
}

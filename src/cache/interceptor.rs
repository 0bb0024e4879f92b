//! Cache Interceptor Module
//!
//! Wires routing, key derivation, expiration and the store into the request
//! flow: resolve route, build keys, look up, and on a miss call the origin and
//! write the captured response.

use std::future::Future;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::entry;
use crate::cache::CacheStats;
use crate::config::CacheOptions;
use crate::error::Result;
use crate::models::{CacheRequest, CacheResponse};
use crate::policy::expiration::COUNTER_RESET_INTERVAL;
use crate::policy::{
    derived_key_patterns, CacheKeys, ExpirationPolicy, KeyBuilder, RoutePolicy, RouteTable,
    Thresholds,
};
use crate::store::{escape, DriverKind, KeySelector, Store};
use crate::tasks::spawn_counter_reset_task;

// == Cache Status ==
/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Replayed from the store
    Hit,
    /// Origin called, response stored when large enough
    Miss,
    /// Caching skipped for this request
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// A response together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: CacheResponse,
    pub status: CacheStatus,
}

// == Cache ==
#[derive(Debug)]
pub struct Cache {
    routes: RouteTable,
    keys: KeyBuilder,
    expiration: ExpirationPolicy,
    store: Store,
    stats: Mutex<CacheStats>,
    ignore_no_cache: bool,
    minimum_body_size: usize,
    /// Hit counter reset loop, present when some route is `"increasing"`
    reset_task: Option<JoinHandle<()>>,
}

impl Cache {
    /// Builds a cache and connects the store described by `options`.
    pub async fn new(options: &CacheOptions) -> Result<Self> {
        let store = Store::connect(options).await?;
        Ok(Self::with_store(options, store))
    }

    /// Builds a cache over an existing store.
    ///
    /// The hit counter reset task is only started when called inside a
    /// tokio runtime.
    pub fn with_store(options: &CacheOptions, store: Store) -> Self {
        let routes = RouteTable::from_config(&options.route_map());
        let expiration = ExpirationPolicy::new(
            options.default_timeout_ms,
            Thresholds::from_config(options.increasing.as_ref()),
            routes.uses_increasing(),
        );
        let reset_task = expiration.counter().and_then(|counter| {
            Handle::try_current()
                .ok()
                .map(|_| spawn_counter_reset_task(counter, COUNTER_RESET_INTERVAL))
        });

        info!(
            routes = routes.len(),
            store = %store.kind(),
            "response cache ready"
        );

        Self {
            routes,
            keys: KeyBuilder::new(options.cache_key_prefix.clone(), options.vary_headers()),
            expiration,
            store,
            stats: Mutex::new(CacheStats::new()),
            ignore_no_cache: options.ignore_no_cache,
            minimum_body_size: options.minimum_body_size,
            reset_task,
        }
    }

    // == Handle ==
    /// Serves `request` from the cache or through `origin`.
    ///
    /// Store failures are returned as errors; routing decisions that rule out
    /// caching are not errors and simply forward to the origin.
    pub async fn handle<F, Fut>(&self, request: &CacheRequest, origin: F) -> Result<Served>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheResponse>>,
    {
        let Some(route) = self.routes.resolve(&request.path) else {
            return self.bypass(origin, "no matching route").await;
        };

        if !request.is_get() {
            self.invalidate(route, &request.path).await?;
            return self.bypass(origin, "non-GET request").await;
        }

        if !self.ignore_no_cache && request.is_no_cache() {
            return self.bypass(origin, "no-cache requested").await;
        }

        let Some(keys) = self.keys.build(route, request) else {
            return self.bypass(origin, "query parameters do not match route").await;
        };

        if self
            .expiration
            .evaluate(route.timeout, &keys.base, self.store.expirations())
            .is_none()
        {
            return self.bypass(origin, "route caching disabled").await;
        }

        if let Some(response) = self.lookup(&keys).await? {
            debug!(key = %keys.base, "cache hit");
            self.stats.lock().record_hit();
            return Ok(Served {
                response,
                status: CacheStatus::Hit,
            });
        }

        debug!(key = %keys.base, "cache miss");
        self.stats.lock().record_miss();

        let mut response = origin().await?;
        response.append_vary(self.keys.vary());

        if response.body.len() < self.minimum_body_size {
            debug!(
                key = %keys.base,
                size = response.body.len(),
                minimum = self.minimum_body_size,
                "body below minimum size, not stored"
            );
        } else {
            self.write(&keys, &response).await?;
        }

        Ok(Served {
            response,
            status: CacheStatus::Miss,
        })
    }

    async fn bypass<F, Fut>(&self, origin: F, reason: &str) -> Result<Served>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheResponse>>,
    {
        debug!(reason = reason, "bypassing cache");
        self.stats.lock().record_bypass();
        Ok(Served {
            response: origin().await?,
            status: CacheStatus::Bypass,
        })
    }

    /// Both blobs must be present for a hit.
    async fn lookup(&self, keys: &CacheKeys) -> Result<Option<CacheResponse>> {
        if !self.store.has(&keys.headers).await? {
            return Ok(None);
        }
        let Some(metadata) = self.store.get(&keys.headers).await? else {
            return Ok(None);
        };
        let Some(body) = self.store.get_buffer(&keys.body).await? else {
            return Ok(None);
        };
        entry::decode(&metadata, body).map(Some)
    }

    async fn write(&self, keys: &CacheKeys, response: &CacheResponse) -> Result<()> {
        let (metadata, body) = entry::encode(response)?;
        self.store
            .set_multiple(
                &keys.base,
                vec![(keys.headers.clone(), metadata), (keys.body.clone(), body)],
            )
            .await?;
        self.stats.lock().record_write();
        Ok(())
    }

    /// Removes every key the route could have stored for `path`.
    async fn invalidate(&self, route: &RoutePolicy, path: &str) -> Result<usize> {
        let prefix = self.keys.prefix_for(route).map(escape);
        let patterns = derived_key_patterns(prefix.as_deref(), &escape(path));
        let removed = self.store.remove(patterns).await?;
        debug!(path = path, removed = removed, "invalidated cached entries");
        self.stats.lock().record_invalidation();
        Ok(removed)
    }

    // == Clear ==
    /// Removes cached entries.
    ///
    /// Without a key, or with an empty one, everything is removed, limited to
    /// the global prefix when one is configured. With a key, the key and all
    /// of its derived keys are removed; glob characters in `key` are honored.
    pub async fn clear(&self, key: Option<&str>) -> Result<usize> {
        let key = key.filter(|key| !key.is_empty());
        let prefix = self.keys.prefix().map(escape);
        let selector = match (key, prefix) {
            (Some(key), prefix) => KeySelector::from(derived_key_patterns(prefix.as_deref(), key)),
            (None, Some(prefix)) => KeySelector::from(format!("{}:*", prefix)),
            (None, None) => KeySelector::All,
        };
        let removed = self.store.remove(selector).await?;
        info!(key = ?key, removed = removed, "cache cleared");
        self.stats.lock().record_invalidation();
        Ok(removed)
    }

    /// Whether the store holds `key` (a full storage key).
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.has(key).await
    }

    pub fn current_cache_type(&self) -> DriverKind {
        self.store.kind()
    }

    /// Clears hit counters and pending TTL assignments.
    pub fn reset(&self) {
        self.expiration.reset();
        self.store.expirations().clear();
    }

    /// Snapshot of the outcome counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Some(task) = self.reset_task.take() {
            task.abort();
        }
    }
}

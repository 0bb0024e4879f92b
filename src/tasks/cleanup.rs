//! Expiry Sweep Task
//!
//! Background task that periodically drops expired entries from the memory
//! driver. Lookups already skip expired entries; the sweep bounds how long
//! they occupy memory when nobody reads them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that periodically purges expired cache entries.
///
/// # Arguments
/// * `cache` - Shared cache whose active store is swept
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::new(&options).await?);
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<Cache>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use crate::store::Store;

    fn cache() -> Arc<Cache> {
        Arc::new(Cache::with_store(&CacheOptions::default(), Store::memory(5000)))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = cache();
        cache
            .store()
            .set("expire_soon", b"value".to_vec(), Some(Duration::from_millis(100)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // the sweep already took it
        assert_eq!(cache.purge_expired().await, 0);
        assert!(!cache.exists("expire_soon").await.unwrap());

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = cache();
        cache
            .store()
            .set("long_lived", b"value".to_vec(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(
            cache.store().get("long_lived").await.unwrap().as_deref(),
            Some("value")
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(cache(), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}

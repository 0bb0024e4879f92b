//! Store Driver Contract
//!
//! The operations both backing stores implement.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Driver Kind ==
/// Which backing store is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Memory,
    Remote,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Memory => f.write_str("memory"),
            DriverKind::Remote => f.write_str("remote"),
        }
    }
}

// == Key Selector ==
/// Target of a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// Every key in the store
    All,
    /// Exact keys or glob patterns, resolved one by one
    Keys(Vec<String>),
}

/// An empty key selects the whole store.
impl From<&str> for KeySelector {
    fn from(key: &str) -> Self {
        if key.is_empty() {
            KeySelector::All
        } else {
            KeySelector::Keys(vec![key.to_string()])
        }
    }
}

impl From<String> for KeySelector {
    fn from(key: String) -> Self {
        if key.is_empty() {
            KeySelector::All
        } else {
            KeySelector::Keys(vec![key])
        }
    }
}

impl From<Vec<String>> for KeySelector {
    fn from(keys: Vec<String>) -> Self {
        KeySelector::Keys(keys)
    }
}

impl From<Option<&str>> for KeySelector {
    fn from(key: Option<&str>) -> Self {
        match key {
            Some(key) => key.into(),
            None => KeySelector::All,
        }
    }
}

// == Driver Trait ==
/// Uniform contract of the in-process and remote stores.
#[async_trait]
pub trait StoreDriver: Send + Sync + fmt::Debug {
    fn kind(&self) -> DriverKind;

    async fn has(&self, key: &str) -> Result<bool>;

    /// Raw stored bytes.
    async fn get_buffer(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stored value decoded as UTF-8 text.
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.get_buffer(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CacheError::Encoding(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Writes related keys that share one TTL.
    async fn set_multiple(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Deletes the selected keys and returns how many were removed.
    async fn remove(&self, selector: &KeySelector) -> Result<usize>;

    /// Drops entries whose TTL has elapsed; drivers with native expiry do
    /// nothing.
    async fn purge_expired(&self) -> usize {
        0
    }
}

//! Policy Module
//!
//! Decides whether a request is cacheable, under which keys, and for how long.

pub mod expiration;
pub mod key;
pub mod route;

pub use expiration::{ExpirationPolicy, ExpirationTable, HitCounter, Thresholds};
pub use key::{derived_key_patterns, CacheKeys, KeyBuilder};
pub use route::{KeyArgs, Matcher, RoutePolicy, RouteTable, Selection, Timeout};

//! Key Builder Module
//!
//! Derives cache keys from a matched route and a request.

use url::form_urlencoded;

use crate::models::CacheRequest;
use crate::policy::route::{RoutePolicy, Selection};

// == Cache Keys ==
/// The keys one cacheable request maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    /// Unprefixed `path[#headers][?query]`; hit counters and TTLs are tracked on it
    pub base: String,
    /// Storage key of the status/header metadata blob
    pub headers: String,
    /// Storage key of the body blob
    pub body: String,
}

// == Key Builder ==
/// Builds deterministic keys for a fixed global prefix and vary list.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: Option<String>,
    vary: Vec<String>,
}

impl KeyBuilder {
    pub fn new(prefix: Option<String>, vary: Vec<String>) -> Self {
        Self { prefix, vary }
    }

    /// The prefix a route writes under: its own, else the global one.
    pub fn prefix_for<'a>(&'a self, route: &'a RoutePolicy) -> Option<&'a str> {
        route.key_prefix.as_deref().or(self.prefix.as_deref())
    }

    /// Global prefix, if configured.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn vary(&self) -> &[String] {
        &self.vary
    }

    /// Builds the base key, or `None` when the route's query list vetoes the
    /// request.
    pub fn base_key(&self, route: &RoutePolicy, request: &CacheRequest) -> Option<String> {
        let mut key = request.path.clone();
        let Some(args) = &route.key_args else {
            return Some(key);
        };

        match &args.headers {
            Some(Selection::Named(names)) => {
                key.push('#');
                for name in names {
                    key.push_str(request.header(name).unwrap_or(""));
                }
            }
            Some(Selection::All) => {
                key.push('#');
                for (_, value) in &request.headers {
                    key.push_str(value);
                }
            }
            None => {}
        }

        match &args.query {
            Some(Selection::Named(expected)) => {
                let mut present: Vec<&str> = request.query.iter().map(|(k, _)| k.as_str()).collect();
                present.sort_unstable();
                present.dedup();

                if present.len() != expected.len()
                    || present.iter().zip(expected).any(|(have, want)| *have != want.as_str())
                {
                    return None;
                }

                key.push('?');
                key.push_str(
                    &form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(request.query.iter())
                        .finish(),
                );
            }
            Some(Selection::All) => {
                let raw = request.raw_query();
                if !raw.is_empty() {
                    key.push('?');
                    key.push_str(raw);
                }
            }
            None => {}
        }

        Some(key)
    }

    /// Variant suffix: `%` followed by the request's vary header values.
    pub fn variant(&self, request: &CacheRequest) -> String {
        let mut variant = String::from("%");
        for name in &self.vary {
            variant.push_str(request.header(name.trim()).unwrap_or(""));
        }
        variant
    }

    /// Full key set for a request, or `None` on a key veto.
    pub fn build(&self, route: &RoutePolicy, request: &CacheRequest) -> Option<CacheKeys> {
        let base = self.base_key(route, request)?;
        let variant = self.variant(request);
        let stem = match self.prefix_for(route) {
            Some(prefix) => format!("{}:{}", prefix, base),
            None => base.clone(),
        };

        Some(CacheKeys {
            headers: format!("{}:headers{}", stem, variant),
            body: format!("{}:body{}", stem, variant),
            base,
        })
    }
}

/// Glob patterns matching a key and every header/body/query/header-variant
/// key derived from it.
pub fn derived_key_patterns(prefix: Option<&str>, key: &str) -> Vec<String> {
    let stem = match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    };
    vec![
        stem.clone(),
        format!("{}:*", stem),
        format!("{}\\?*", stem),
        format!("{}#*", stem),
    ]
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(pattern: &str, value: serde_json::Value) -> RoutePolicy {
        RoutePolicy::from_config(pattern, &value).unwrap()
    }

    fn builder() -> KeyBuilder {
        KeyBuilder::new(None, vec!["Accept-Encoding".to_string()])
    }

    #[test]
    fn test_plain_path_keys() {
        let keys = builder()
            .build(&route("/a", json!(true)), &CacheRequest::get("/a?x=1").with_header("Accept-Encoding", "gzip"))
            .unwrap();

        assert_eq!(keys.base, "/a");
        assert_eq!(keys.headers, "/a:headers%gzip");
        assert_eq!(keys.body, "/a:body%gzip");
    }

    #[test]
    fn test_named_headers_keep_configured_order() {
        let route = route("/h", json!({ "cacheKeyArgs": { "headers": ["x-b", "x-a"] } }));
        let req = CacheRequest::get("/h").with_header("X-A", "1").with_header("X-B", "2");

        assert_eq!(builder().base_key(&route, &req).unwrap(), "/h#21");
    }

    #[test]
    fn test_missing_header_contributes_nothing() {
        let route = route("/h", json!({ "cacheKeyArgs": { "headers": ["x-a", "x-b"] } }));
        let req = CacheRequest::get("/h").with_header("X-B", "2");

        assert_eq!(builder().base_key(&route, &req).unwrap(), "/h#2");
    }

    #[test]
    fn test_all_headers_use_request_order() {
        let route = route("/h", json!({ "cacheKeyArgs": { "headers": true } }));
        let req = CacheRequest::get("/h").with_header("B", "b").with_header("A", "a");

        assert_eq!(builder().base_key(&route, &req).unwrap(), "/h#ba");
    }

    #[test]
    fn test_query_set_must_match_exactly() {
        let route = route("/s", json!({ "cacheKeyArgs": { "query": ["q", "page"] } }));
        let b = builder();

        assert!(b.base_key(&route, &CacheRequest::get("/s?q=x")).is_none());
        assert!(b.base_key(&route, &CacheRequest::get("/s?q=x&page=1&extra=2")).is_none());
        assert!(b.base_key(&route, &CacheRequest::get("/s?q=x&size=1")).is_none());

        assert_eq!(
            b.base_key(&route, &CacheRequest::get("/s?page=1&q=a%20b")).unwrap(),
            "/s?page=1&q=a+b"
        );
    }

    #[test]
    fn test_all_query_uses_raw_string() {
        let route = route("/s", json!({ "cacheKeyArgs": { "query": true } }));
        let b = builder();

        assert_eq!(b.base_key(&route, &CacheRequest::get("/s?b=2&a=1")).unwrap(), "/s?b=2&a=1");
        assert_eq!(b.base_key(&route, &CacheRequest::get("/s")).unwrap(), "/s");
    }

    #[test]
    fn test_headers_then_query() {
        let route = route(
            "/c",
            json!({ "cacheKeyArgs": { "headers": "x-tenant", "query": "id" } }),
        );
        let req = CacheRequest::get("/c?id=9").with_header("x-tenant", "acme");

        assert_eq!(builder().base_key(&route, &req).unwrap(), "/c#acme?id=9");
    }

    #[test]
    fn test_prefix_precedence() {
        let global = KeyBuilder::new(Some("app".into()), vec![]);
        let req = CacheRequest::get("/p");

        let keys = global.build(&route("/p", json!(true)), &req).unwrap();
        assert_eq!(keys.headers, "app:/p:headers%");

        let keys = global
            .build(&route("/p", json!({ "cacheKeyPrefix": "v2" })), &req)
            .unwrap();
        assert_eq!(keys.body, "v2:/p:body%");
        assert_eq!(keys.base, "/p");
    }

    #[test]
    fn test_variants_do_not_collide() {
        let route = route("/v", json!(true));
        let b = builder();

        let gzip = b.build(&route, &CacheRequest::get("/v").with_header("Accept-Encoding", "gzip")).unwrap();
        let plain = b.build(&route, &CacheRequest::get("/v")).unwrap();

        assert_eq!(gzip.base, plain.base);
        assert_ne!(gzip.headers, plain.headers);
        assert_ne!(gzip.body, plain.body);
    }

    #[test]
    fn test_derived_key_patterns() {
        assert_eq!(
            derived_key_patterns(Some("app"), "/a"),
            vec!["app:/a", "app:/a:*", "app:/a\\?*", "app:/a#*"]
        );
        assert_eq!(derived_key_patterns(None, "/a")[0], "/a");
    }
}

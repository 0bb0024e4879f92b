//! Route Matcher Module
//!
//! Compiles the configured route map into an ordered table of policies and
//! resolves incoming paths against it.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Characters a `:name` segment may match.
const SAFE_SEGMENT: &str = r"[A-Za-z0-9$\-_.+!*'(),]+";

// == Timeout ==
/// Caching decision attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never cache
    Disabled,
    /// Use the global default TTL
    Default,
    /// Literal TTL in milliseconds
    Fixed(u64),
    /// Adaptive TTL driven by hit counts
    Increasing,
}

impl Timeout {
    /// Interprets a scalar timeout value; `None` means the value is unsupported.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Timeout::Default),
            Value::Bool(false) => Some(Timeout::Disabled),
            Value::Number(n) => n
                .as_f64()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| Timeout::Fixed(ms as u64)),
            Value::String(s) if s == "increasing" => Some(Timeout::Increasing),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| Timeout::Fixed(ms as u64)),
            _ => None,
        }
    }
}

// == Key Arguments ==
/// Which headers or query parameters feed the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Named(Vec<String>),
}

/// Request attributes that extend the base key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyArgs {
    /// Header values appended after `#`, in list order
    pub headers: Option<Selection>,
    /// Query parameters appended after `?`; a named list must match exactly
    pub query: Option<Selection>,
    /// Reserved for an external key derivation hook
    pub custom: Option<String>,
}

impl KeyArgs {
    fn from_value(value: &Value) -> Result<Option<Self>, &'static str> {
        match value {
            Value::Null => Ok(None),
            Value::Array(_) => Err("cacheKeyArgs of array type not supported"),
            Value::String(custom) => Ok(Some(KeyArgs {
                custom: Some(custom.clone()),
                ..KeyArgs::default()
            })),
            Value::Object(fields) => {
                let mut headers = selection(fields.get("headers"))?;
                let query = match selection(fields.get("query"))? {
                    Some(Selection::Named(mut names)) => {
                        names.sort();
                        Some(Selection::Named(names))
                    }
                    other => other,
                };

                if fields.get("sortHeaders") == Some(&Value::Bool(true)) {
                    if let Some(Selection::Named(names)) = headers.as_mut() {
                        names.sort();
                    }
                }

                Ok(Some(KeyArgs {
                    headers,
                    query,
                    custom: fields
                        .get("custom")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }))
            }
            _ => Err("unsupported cacheKeyArgs value"),
        }
    }
}

fn selection(value: Option<&Value>) -> Result<Option<Selection>, &'static str> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(Selection::All)),
        Some(Value::String(name)) => Ok(Some(Selection::Named(vec![name.clone()]))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or("key argument names must be strings")
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|names| Some(Selection::Named(names))),
        Some(_) => Err("unsupported key argument selection"),
    }
}

// == Matcher ==
/// How a route pattern is compared with a request path.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Literal comparison only
    Exact,
    /// Literal comparison, then the compiled pattern
    Pattern(Regex),
}

/// Compiles `:name` and `*` segments; returns `None` for literal patterns.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    if !pattern.contains(':') && !pattern.contains('*') {
        return None;
    }

    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut buf = [0u8; 4];

    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek().is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_') => {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_')
                {
                    chars.next();
                }
                re.push_str(SAFE_SEGMENT);
            }
            '*' => re.push_str(".*"),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    re.push_str("(?:/)?$");

    match Regex::new(&re) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern = pattern, error = %e, "route pattern failed to compile");
            None
        }
    }
}

// == Route Policy ==
/// One configured route.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub pattern: String,
    pub matcher: Matcher,
    pub timeout: Timeout,
    pub key_args: Option<KeyArgs>,
    /// Overrides the global key prefix for this route
    pub key_prefix: Option<String>,
}

impl RoutePolicy {
    /// Builds a policy from a route map entry.
    ///
    /// Returns `None` (after logging) for entries that cannot be honoured.
    pub fn from_config(pattern: &str, value: &Value) -> Option<Self> {
        let (timeout, key_args, key_prefix) = match value {
            Value::Object(fields) => {
                let timeout = match fields.get("timeout") {
                    None | Some(Value::Null) => Some(Timeout::Default),
                    Some(raw) => Timeout::from_value(raw),
                };
                let raw_args = fields
                    .get("cacheKeyArgs")
                    .or_else(|| fields.get("keyArgs"))
                    .unwrap_or(&Value::Null);
                let key_args = match KeyArgs::from_value(raw_args) {
                    Ok(args) => args,
                    Err(reason) => {
                        warn!(route = pattern, reason, "dropping route");
                        return None;
                    }
                };
                let key_prefix = fields
                    .get("cacheKeyPrefix")
                    .or_else(|| fields.get("keyPrefix"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (timeout, key_args, key_prefix)
            }
            scalar => (Timeout::from_value(scalar), None, None),
        };

        let Some(timeout) = timeout else {
            warn!(route = pattern, value = %value, "invalid timeout for route, dropping");
            return None;
        };

        let matcher = match compile_pattern(pattern) {
            Some(regex) => Matcher::Pattern(regex),
            None => Matcher::Exact,
        };

        Some(Self {
            pattern: pattern.to_string(),
            matcher,
            timeout,
            key_args,
            key_prefix,
        })
    }

    /// Literal equality with the configured pattern.
    pub fn matches_exact(&self, path: &str) -> bool {
        self.pattern == path
    }

    /// Compiled pattern match; always false for exact-only routes.
    pub fn matches_pattern(&self, path: &str) -> bool {
        match &self.matcher {
            Matcher::Pattern(regex) => regex.is_match(path),
            Matcher::Exact => false,
        }
    }
}

// == Route Table ==
type MatchPass = fn(&RoutePolicy, &str) -> bool;

/// Passes tried in priority order; the first route any pass accepts wins.
const MATCH_PASSES: [(&str, MatchPass); 2] = [
    ("exact", RoutePolicy::matches_exact),
    ("pattern", RoutePolicy::matches_pattern),
];

/// Ordered set of route policies, frozen after construction.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RoutePolicy>,
}

impl RouteTable {
    /// Builds the table in declaration order, dropping invalid entries.
    pub fn from_config(routes: &Map<String, Value>) -> Self {
        let routes = routes
            .iter()
            .filter_map(|(pattern, value)| RoutePolicy::from_config(pattern, value))
            .collect();
        Self { routes }
    }

    /// Returns the policy governing `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&RoutePolicy> {
        MATCH_PASSES.iter().find_map(|(kind, pass)| {
            let found = self.routes.iter().find(|route| pass(route, path));
            if let Some(route) = found {
                debug!(path = path, route = %route.pattern, kind = *kind, "matched route");
            }
            found
        })
    }

    /// True if any route uses adaptive TTLs.
    pub fn uses_increasing(&self) -> bool {
        self.routes
            .iter()
            .any(|route| route.timeout == Timeout::Increasing)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutePolicy> {
        self.routes.iter()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> RouteTable {
        match value {
            Value::Object(map) => RouteTable::from_config(&map),
            _ => panic!("route map must be an object"),
        }
    }

    #[test]
    fn test_scalar_timeouts() {
        let routes = table(json!({
            "/a": true,
            "/b": false,
            "/c": 1500,
            "/d": "2500",
            "/e": "increasing",
        }));

        let timeouts: Vec<Timeout> = routes.iter().map(|r| r.timeout).collect();
        assert_eq!(
            timeouts,
            vec![
                Timeout::Default,
                Timeout::Disabled,
                Timeout::Fixed(1500),
                Timeout::Fixed(2500),
                Timeout::Increasing,
            ]
        );
        assert!(routes.uses_increasing());
    }

    #[test]
    fn test_invalid_entries_dropped() {
        let routes = table(json!({
            "/bad-string": "forever",
            "/bad-array": [1, 2],
            "/bad-args": { "cacheKeyArgs": ["headers"] },
            "/bad-timeout": { "timeout": "sometimes" },
            "/good": 100,
        }));

        assert_eq!(routes.len(), 1);
        assert!(routes.resolve("/good").is_some());
        assert!(!routes.uses_increasing());
    }

    #[test]
    fn test_object_route_without_timeout_uses_default() {
        let routes = table(json!({ "/x": { "cacheKeyPrefix": "v1" } }));
        let route = routes.resolve("/x").unwrap();
        assert_eq!(route.timeout, Timeout::Default);
        assert_eq!(route.key_prefix.as_deref(), Some("v1"));
    }

    #[test]
    fn test_key_args_normalization() {
        let routes = table(json!({
            "/one": { "cacheKeyArgs": { "headers": "x-tenant", "query": ["page", "limit"] } },
            "/all": { "cacheKeyArgs": { "headers": true, "query": true } },
            "/custom": { "cacheKeyArgs": "tenant-hook" },
            "/sorted": { "cacheKeyArgs": { "headers": ["b", "a"], "sortHeaders": true } },
            "/ordered": { "cacheKeyArgs": { "headers": ["b", "a"] } },
        }));

        let args = routes.resolve("/one").unwrap().key_args.clone().unwrap();
        assert_eq!(args.headers, Some(Selection::Named(vec!["x-tenant".into()])));
        assert_eq!(
            args.query,
            Some(Selection::Named(vec!["limit".into(), "page".into()]))
        );

        let args = routes.resolve("/all").unwrap().key_args.clone().unwrap();
        assert_eq!(args.headers, Some(Selection::All));
        assert_eq!(args.query, Some(Selection::All));

        let args = routes.resolve("/custom").unwrap().key_args.clone().unwrap();
        assert_eq!(args.custom.as_deref(), Some("tenant-hook"));
        assert!(args.headers.is_none());

        let args = routes.resolve("/sorted").unwrap().key_args.clone().unwrap();
        assert_eq!(args.headers, Some(Selection::Named(vec!["a".into(), "b".into()])));

        let args = routes.resolve("/ordered").unwrap().key_args.clone().unwrap();
        assert_eq!(args.headers, Some(Selection::Named(vec!["b".into(), "a".into()])));
    }

    #[test]
    fn test_param_pattern() {
        let routes = table(json!({ "/users/:id/posts": 100 }));

        assert!(routes.resolve("/users/42/posts").is_some());
        assert!(routes.resolve("/users/a-b_c.d/posts/").is_some());
        assert!(routes.resolve("/users/42/posts/extra").is_none());
        assert!(routes.resolve("/users//posts").is_none());
        assert!(routes.resolve("/users/a/b/posts").is_none());
    }

    #[test]
    fn test_wildcard_pattern() {
        let routes = table(json!({ "/static/*": 100 }));

        assert!(routes.resolve("/static/").is_some());
        assert!(routes.resolve("/static/css/site.css").is_some());
        assert!(routes.resolve("/other/static/x").is_none());
    }

    #[test]
    fn test_literal_pattern_is_exact_only() {
        let routes = table(json!({ "/about": 100 }));
        assert!(matches!(routes.iter().next().unwrap().matcher, Matcher::Exact));
        assert!(routes.resolve("/about").is_some());
        assert!(routes.resolve("/about/").is_none());
        assert!(routes.resolve("/aboutus").is_none());
    }

    #[test]
    fn test_exact_outranks_earlier_pattern() {
        let routes = table(json!({
            "*": 1000,
            "/items/:id": 2000,
            "/items/special": 3000,
        }));

        assert_eq!(
            routes.resolve("/items/special").unwrap().timeout,
            Timeout::Fixed(3000)
        );
        // Among patterns declaration order decides
        assert_eq!(routes.resolve("/items/7").unwrap().timeout, Timeout::Fixed(1000));
    }

    #[test]
    fn test_unmatched_path() {
        let routes = table(json!({ "/api/:version/status": true }));
        assert!(routes.resolve("/health").is_none());
        assert!(RouteTable::default().resolve("/anything").is_none());
    }
}

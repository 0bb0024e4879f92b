//! Request view handed to the cache by the hosting pipeline
//!
//! The cache never parses HTTP itself; adapters fill in this structure.

use url::form_urlencoded;

/// The parts of an inbound request the cache consults.
///
/// Headers keep the order the pipeline enumerated them in, which matters for
/// routes that key on all headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    /// Upper-case HTTP method
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Path plus query string as received
    pub url: String,
    /// Header name/value pairs in request order
    pub headers: Vec<(String, String)>,
    /// Decoded query pairs in request order
    pub query: Vec<(String, String)>,
}

impl CacheRequest {
    /// Creates a request from a method and a path-with-query.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let (path, raw_query) = match url.split_once('?') {
            Some((path, query)) => (path.to_string(), query),
            None => (url.clone(), ""),
        };
        let query = form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();

        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            url,
            headers: Vec::new(),
            query,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Appends a header, keeping earlier ones in place.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The query string exactly as it appeared in the URL.
    pub fn raw_query(&self) -> &str {
        self.url.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// True when the client asked to bypass caches.
    pub fn is_no_cache(&self) -> bool {
        self.header("cache-control").is_some_and(|value| {
            value
                .split(',')
                .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_and_query() {
        let req = CacheRequest::get("/search?q=rust+lang&page=2");
        assert_eq!(req.path, "/search");
        assert_eq!(req.raw_query(), "q=rust+lang&page=2");
        assert_eq!(
            req.query,
            vec![
                ("q".to_string(), "rust lang".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_query() {
        let req = CacheRequest::new("post", "/items");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/items");
        assert!(req.query.is_empty());
        assert_eq!(req.raw_query(), "");
        assert!(!req.is_get());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = CacheRequest::get("/").with_header("Accept-Encoding", "gzip");
        assert_eq!(req.header("accept-encoding"), Some("gzip"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_no_cache_detection() {
        let req = CacheRequest::get("/").with_header("Cache-Control", "max-age=0, no-cache");
        assert!(req.is_no_cache());

        let req = CacheRequest::get("/").with_header("Cache-Control", "no-store");
        assert!(!req.is_no_cache());
    }
}

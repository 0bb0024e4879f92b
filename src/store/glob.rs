//! Glob Matcher Module
//!
//! Restricted glob syntax used for bulk key removal: `*`, `?`, `{a,b}` and
//! `\x` for a literal `x`. Every other character matches itself.

use regex::Regex;

use crate::error::{CacheError, Result};

/// Characters that turn a removal key into a pattern.
const GLOB_CHARS: &[char] = &['*', '!', '?', '{', '}', '(', '|', ')', '[', ']'];

/// Characters escaped by [`escape`].
const ESCAPED_CHARS: &[char] = &[
    '*', '!', '?', '{', '}', '(', '|', ')', '[', ']', '\\', ',',
];

/// Returns true if the key contains any glob metacharacter.
pub fn has_glob(pattern: &str) -> bool {
    pattern.contains(GLOB_CHARS)
}

/// Escapes text so that it matches only itself when compiled as a glob.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPED_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// == Glob ==
/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    regex: Regex,
}

impl Glob {
    /// Compiles a glob into an anchored regular expression.
    pub fn new(pattern: &str) -> Result<Self> {
        let mut out = String::from("(?s)^");
        let mut chars = pattern.chars();
        let mut depth = 0usize;
        let mut buf = [0u8; 4];

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(next) => out.push_str(&regex::escape(next.encode_utf8(&mut buf))),
                    None => out.push_str(r"\\"),
                },
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '{' => {
                    depth += 1;
                    out.push_str("(?:");
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    out.push(')');
                }
                ',' if depth > 0 => out.push('|'),
                other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
            }
        }

        if depth > 0 {
            return Err(CacheError::Config(format!(
                "unbalanced alternation in glob: {}",
                pattern
            )));
        }
        out.push('$');

        let regex = Regex::new(&out)
            .map_err(|e| CacheError::Config(format!("invalid glob {}: {}", pattern, e)))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Tests a key against the pattern.
    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Expands alternation groups into plain patterns that a remote store's
    /// key lookup understands (`*`, `?` and escapes are left intact).
    pub fn expand(&self) -> Vec<String> {
        expand_braces(&self.source)
    }
}

fn expand_braces(pattern: &str) -> Vec<String> {
    let bytes = pattern.as_bytes();
    let mut depth = 0usize;
    let mut open = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => {
                if depth == 0 {
                    open = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let prefix = &pattern[..open];
                    let suffix = &pattern[i + 1..];
                    return split_alternatives(&pattern[open + 1..i])
                        .into_iter()
                        .flat_map(|alt| expand_braces(&format!("{}{}{}", prefix, alt, suffix)))
                        .collect();
                }
            }
            _ => {}
        }
        i += 1;
    }

    vec![pattern.to_string()]
}

/// Splits a group body on commas that are not nested or escaped.
fn split_alternatives(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&body[start..]);
    parts
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_glob() {
        assert!(has_glob("foo*"));
        assert!(has_glob("/a\\?*"));
        assert!(has_glob("{a,b}"));
        assert!(!has_glob("/plain/key:headers%gzip"));
    }

    #[test]
    fn test_star_and_question() {
        let glob = Glob::new("foo*").unwrap();
        assert!(glob.is_match("foo"));
        assert!(glob.is_match("foobar"));
        assert!(!glob.is_match("xfoo"));

        let glob = Glob::new("f?o").unwrap();
        assert!(glob.is_match("fao"));
        assert!(!glob.is_match("fo"));
        assert!(!glob.is_match("faao"));
    }

    #[test]
    fn test_alternation() {
        let glob = Glob::new("/items:{headers,body}*").unwrap();
        assert!(glob.is_match("/items:headers%gzip"));
        assert!(glob.is_match("/items:body%"));
        assert!(!glob.is_match("/items:meta%"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let glob = Glob::new("/a.b+c$*").unwrap();
        assert!(glob.is_match("/a.b+c$:body"));
        assert!(!glob.is_match("/aXb+c$:body"));
    }

    #[test]
    fn test_escaped_question_mark() {
        let glob = Glob::new("/search\\?*").unwrap();
        assert!(glob.is_match("/search?q=rust:body%"));
        assert!(!glob.is_match("/searchXq=rust"));
    }

    #[test]
    fn test_unbalanced_brace_rejected() {
        assert!(Glob::new("/a{b,c").is_err());
    }

    #[test]
    fn test_expand() {
        let glob = Glob::new("k:{a,b{c,d}}:*").unwrap();
        assert_eq!(glob.expand(), vec!["k:a:*", "k:bc:*", "k:bd:*"]);

        let glob = Glob::new("k\\{x\\}*").unwrap();
        assert_eq!(glob.expand(), vec!["k\\{x\\}*"]);
    }

    #[test]
    fn test_escape_matches_only_itself() {
        let text = "/odd(path)?x=*{1,2}";
        let glob = Glob::new(&escape(text)).unwrap();
        assert!(glob.is_match(text));
        assert!(!glob.is_match("/odd(path)Zx=*{1,2}"));
    }
}

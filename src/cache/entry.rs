//! Cache Entry Module
//!
//! Serialized form of a captured response: a JSON metadata blob stored under
//! the headers key and a body blob stored under the body key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::CacheResponse;

/// Per-client headers that are never stored.
const UNCACHED_HEADERS: &[&str] = &["set-cookie"];

// == Entry Metadata ==
/// Status line and headers of a captured response, replayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub status: u16,
    pub message: String,
    /// Header name -> value, sorted by name; repeated headers are joined
    /// with `", "`
    pub header: BTreeMap<String, String>,
    /// Body blob holds raw bytes instead of a JSON string
    #[serde(default)]
    pub binary: bool,
}

impl EntryMetadata {
    fn capture(response: &CacheResponse, binary: bool) -> Self {
        let mut header: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &response.headers {
            if UNCACHED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            header
                .entry(name.clone())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }

        Self {
            status: response.status,
            message: response.message.clone(),
            header,
            binary,
        }
    }
}

// == Encode ==
/// Serializes a response into `(metadata, body)` blobs.
///
/// Textual bodies are stored as a JSON string. Binary content types, encoded
/// bodies and anything that is not valid UTF-8 are stored as raw bytes.
pub fn encode(response: &CacheResponse) -> Result<(Vec<u8>, Vec<u8>)> {
    let text = if response.is_binary() {
        None
    } else {
        std::str::from_utf8(&response.body).ok()
    };

    let (body, binary) = match text {
        Some(text) => (serde_json::to_vec(text)?, false),
        None => (response.body.clone(), true),
    };

    let metadata = serde_json::to_vec(&EntryMetadata::capture(response, binary))?;
    Ok((metadata, body))
}

// == Decode ==
/// Rebuilds a response from stored blobs.
pub fn decode(metadata: &str, body: Vec<u8>) -> Result<CacheResponse> {
    let metadata: EntryMetadata = serde_json::from_str(metadata)?;
    let body = if metadata.binary {
        body
    } else {
        serde_json::from_slice::<String>(&body)?.into_bytes()
    };

    Ok(CacheResponse {
        status: metadata.status,
        message: metadata.message,
        headers: metadata.header.into_iter().collect(),
        body,
    })
}

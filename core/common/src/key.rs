//! `adapter://bucket/key` addressing.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::{Error, Result};

/// Characters escaped before the raw URI is handed to the URL parser.
///
/// `:` and `/` stay literal since they delimit the scheme, bucket and key.
const RAW_URI_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'^')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'\\');

/// Routable coordinates of an object: which adapter, which bucket, which key.
///
/// An empty key addresses the whole bucket. That is valid for listing but
/// rejected by operations that need a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyContext {
    adapter: String,
    bucket: String,
    key: String,
}

impl KeyContext {
    /// Create a context from already-decoded parts.
    ///
    /// # Errors
    /// - `adapter` or `bucket` is empty
    /// - `bucket` contains a `/`
    pub fn new(
        adapter: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let adapter = adapter.into();
        let bucket = bucket.into();
        if adapter.is_empty() {
            return Err(Error::KeyParse("adapter cannot be empty".to_string()));
        }
        if bucket.is_empty() {
            return Err(Error::KeyParse("bucket cannot be empty".to_string()));
        }
        if bucket.contains('/') {
            return Err(Error::KeyParse(format!(
                "bucket cannot contain '/': {}",
                bucket
            )));
        }
        Ok(Self {
            adapter,
            bucket,
            key: key.into(),
        })
    }

    /// Parse a raw `adapter://bucket/key` string.
    ///
    /// The input is taken literally: a `%` or space in the bucket or key is
    /// part of the name, not an escape sequence. The key is everything after
    /// the first `/` following the bucket, exactly as written; `.` and `..`
    /// segments are left for the adapter to judge.
    ///
    /// # Errors
    /// - `Error::KeyParse` when scheme or bucket are missing, a port is
    ///   present, or a component does not decode to UTF-8
    pub fn parse(raw: &str) -> Result<Self> {
        let escaped = utf8_percent_encode(raw, RAW_URI_ESCAPE).to_string();
        let url = Url::parse(&escaped)
            .map_err(|e| Error::KeyParse(format!("{}: {}", raw, e)))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::KeyParse(format!("missing bucket in '{}'", raw)))?;

        if url.port().is_some() {
            return Err(Error::KeyParse(format!(
                "bucket cannot carry a port in '{}'",
                raw
            )));
        }

        let bucket = decode(host, raw)?;

        // `url.path()` has dot segments resolved already.
        let key = raw
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map_or("", |(_, key)| key);

        Self::new(url.scheme(), bucket, key)
    }

    /// Adapter name (URI scheme).
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key, possibly empty.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this context addresses a whole bucket.
    pub fn is_bucket(&self) -> bool {
        self.key.is_empty()
    }

    /// Same adapter and bucket, another key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            adapter: self.adapter.clone(),
            bucket: self.bucket.clone(),
            key: key.into(),
        }
    }

    /// Render back to `adapter://bucket/key`.
    pub fn uri(&self) -> String {
        render(&self.adapter, &self.bucket, &self.key)
    }
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.adapter, self.bucket, self.key)
    }
}

/// Render coordinates as a fully qualified URI without escaping.
pub fn render(adapter: &str, bucket: &str, key: &str) -> String {
    format!("{}://{}/{}", adapter, bucket, key)
}

fn decode(component: &str, raw: &str) -> Result<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::KeyParse(format!("'{}' is not valid UTF-8: {}", raw, e)))
}

//! Storage adapter trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use uniblob_common::{Error, Result};

/// Chunk size used by streamed transfers when the caller does not pick one.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Bucket and key of a stored object, without its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// A downloaded object with its full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
    /// Object bytes.
    pub content: Bytes,
}

impl Object {
    /// Reference to this object without the content.
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.bucket.clone(), self.key.clone())
    }
}

/// One batch of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Bucket that was listed.
    pub bucket: String,
    /// Keys in this page, in ascending order.
    pub keys: Vec<String>,
}

/// Lazy, finite, non-restartable sequence of listing pages.
pub type PageStream = BoxStream<'static, Result<Page>>;

/// Lazy sequence of `(object, chunk)` pairs for a streamed download.
pub type ChunkStream = BoxStream<'static, Result<(ObjectRef, Bytes)>>;

/// Append-only destination of a streamed upload.
///
/// Nothing becomes visible at the destination until [`UploadSink::finish`]
/// returns successfully. Dropping a sink without finishing abandons the write.
#[async_trait]
pub trait UploadSink: Send {
    /// Append the next chunk.
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Complete the write and expose the object.
    async fn finish(self: Box<Self>) -> Result<ObjectRef>;
}

/// Storage adapter trait for the different backends.
///
/// Every backend presents the same semantics: full-overwrite uploads with no
/// partial visibility, bucket isolation, plain string prefix listing in pages
/// of bounded size, and chunked transfers that never hold a whole object.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Registered adapter name (e.g., "disk", "inmemory", "gcs").
    fn name(&self) -> &str;

    /// The form a key is stored under by this backend.
    ///
    /// Listing returns keys in this form.
    fn normalize_key(&self, key: &str) -> String {
        key.to_string()
    }

    /// Store `content` under `key`, replacing any previous content.
    async fn upload(&self, bucket: &str, key: &str, content: Bytes) -> Result<ObjectRef>;

    /// Fetch the full content stored under `key`.
    ///
    /// # Errors
    /// - `Error::NotFound` when the key is absent from this bucket
    async fn download(&self, bucket: &str, key: &str) -> Result<Object>;

    /// List keys starting with `prefix`, at most `page_size` per page.
    ///
    /// The prefix is a plain string prefix: `2019-01` matches both
    /// `2019-01/x` and `2019-01extra`.
    ///
    /// # Errors
    /// - `page_size` is zero
    async fn list(&self, bucket: &str, prefix: &str, page_size: usize) -> Result<PageStream>;

    /// Remove `key`. Returns `true` on success.
    ///
    /// Whether an absent key is an error is backend-specific.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Read `key` lazily in chunks of `chunk_size` bytes.
    ///
    /// Every chunk but the last has exactly `chunk_size` bytes.
    async fn stream_download(
        &self,
        bucket: &str,
        key: &str,
        chunk_size: usize,
    ) -> Result<ChunkStream>;

    /// Open a sink that writes `key` once finished.
    async fn stream_upload(&self, bucket: &str, key: &str) -> Result<Box<dyn UploadSink>>;

    /// Rename `from` to `to`; buckets may differ, the adapter may not.
    ///
    /// Optional capability; backends that cannot move report `Unsupported`.
    async fn move_object(&self, from: &ObjectRef, to: &ObjectRef) -> Result<ObjectRef> {
        let _ = (from, to);
        Err(Error::Unsupported(format!("{} cannot move objects", self.name())))
    }
}

/// Reject a zero page size.
pub fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(Error::InvalidInput("page size must be positive".to_string()));
    }
    Ok(())
}

/// Reject a zero chunk size.
pub fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".to_string()));
    }
    Ok(())
}

/// Slice a sorted key listing into lazily built pages.
///
/// Used by backends without native pagination. An empty listing yields no pages.
pub fn paginate(bucket: impl Into<String>, keys: Vec<String>, page_size: usize) -> Result<PageStream> {
    check_page_size(page_size)?;
    let bucket = bucket.into();
    let mut keys = keys.into_iter();

    let pages = std::iter::from_fn(move || {
        let batch: Vec<String> = keys.by_ref().take(page_size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(Ok(Page {
                bucket: bucket.clone(),
                keys: batch,
            }))
        }
    });

    Ok(Box::pin(stream::iter(pages)))
}

/// Serve an in-memory buffer as a chunk stream.
pub fn chunk_bytes(object: ObjectRef, content: Bytes, chunk_size: usize) -> Result<ChunkStream> {
    check_chunk_size(chunk_size)?;
    let len = content.len();
    let chunks = (0..len).step_by(chunk_size).map(move |start| {
        let end = start.saturating_add(chunk_size).min(len);
        Ok((object.clone(), content.slice(start..end)))
    });
    Ok(Box::pin(stream::iter(chunks)))
}

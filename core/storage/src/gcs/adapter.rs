//! Google Cloud Storage adapter implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use std::collections::VecDeque;
use std::sync::Arc;

use uniblob_common::{Error, Result};

use crate::adapter::{
    check_chunk_size, check_page_size, ChunkStream, Object, ObjectRef, Page, PageStream,
    StorageAdapter, UploadSink,
};
use crate::config::GcsConfig;

use super::client::{GcsClient, UPLOAD_ALIGNMENT};

/// Bytes buffered by a streamed upload before a chunk is sent.
const UPLOAD_FLUSH_THRESHOLD: usize = 32 * UPLOAD_ALIGNMENT;

/// Google Cloud Storage adapter.
///
/// Uploads never check the bucket first; a missing bucket surfaces on the
/// first real request. Deleting an absent key fails with `Error::NotFound`.
pub struct GcsAdapter {
    client: Arc<GcsClient>,
}

impl GcsAdapter {
    /// Create a new adapter from configuration.
    pub fn new(config: &GcsConfig) -> Result<Self> {
        Ok(Self::with_client(GcsClient::new(config)?))
    }

    /// Create an adapter over an existing client.
    pub fn with_client(client: GcsClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait]
impl StorageAdapter for GcsAdapter {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn upload(&self, bucket: &str, key: &str, content: Bytes) -> Result<ObjectRef> {
        let object = self.client.put_object(bucket, key, content).await?;
        Ok(ObjectRef::new(object.bucket, object.name))
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Object> {
        let content = self.client.get_object(bucket, key).await?;
        Ok(Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content,
        })
    }

    async fn list(&self, bucket: &str, prefix: &str, page_size: usize) -> Result<PageStream> {
        check_page_size(page_size)?;

        let listing = Listing {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            token: None,
            cutter: PageCutter::new(page_size),
        };

        Ok(Box::pin(stream::try_unfold(listing, next_page)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        self.client.delete_object(bucket, key).await?;
        Ok(true)
    }

    async fn stream_download(
        &self,
        bucket: &str,
        key: &str,
        chunk_size: usize,
    ) -> Result<ChunkStream> {
        check_chunk_size(chunk_size)?;
        let metadata = self.client.object_metadata(bucket, key).await?;
        let size = metadata
            .size_bytes()
            .ok_or_else(|| Error::Network(format!("Object has no size: {}/{}", bucket, key)))?;

        let reader = RangeReader {
            client: self.client.clone(),
            object: ObjectRef::new(bucket, key),
            offset: 0,
            size,
            chunk_size: chunk_size as u64,
        };

        Ok(Box::pin(stream::try_unfold(reader, next_range)))
    }

    async fn stream_upload(&self, bucket: &str, key: &str) -> Result<Box<dyn UploadSink>> {
        let session = self.client.start_resumable(bucket, key).await?;

        Ok(Box::new(GcsSink {
            client: self.client.clone(),
            session,
            target: ObjectRef::new(bucket, key),
            buffer: UploadBuffer::default(),
        }))
    }

    async fn move_object(&self, from: &ObjectRef, to: &ObjectRef) -> Result<ObjectRef> {
        self.client.rewrite(from, to).await?;
        self.client.delete_object(&from.bucket, &from.key).await?;
        Ok(to.clone())
    }
}

/// State of a listing between pulls.
struct Listing {
    client: Arc<GcsClient>,
    bucket: String,
    prefix: String,
    token: Option<String>,
    cutter: PageCutter,
}

async fn next_page(mut listing: Listing) -> Result<Option<(Page, Listing)>> {
    loop {
        if let Some(keys) = listing.cutter.next_page() {
            let page = Page {
                bucket: listing.bucket.clone(),
                keys,
            };
            return Ok(Some((page, listing)));
        }
        if listing.cutter.is_exhausted() {
            return Ok(None);
        }

        let list = listing
            .client
            .list_page(
                &listing.bucket,
                &listing.prefix,
                listing.cutter.page_size,
                listing.token.as_deref(),
            )
            .await?;

        listing.token = list.next_page_token;
        listing
            .cutter
            .push(list.items.into_iter().map(|o| o.name), listing.token.is_some());
    }
}

/// Re-cuts backend pages so every emitted page holds between one and
/// `page_size` keys, whatever sizes the store returns.
#[derive(Debug)]
struct PageCutter {
    page_size: usize,
    buffered: VecDeque<String>,
    exhausted: bool,
}

impl PageCutter {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    fn push(&mut self, keys: impl IntoIterator<Item = String>, has_more: bool) {
        self.buffered.extend(keys);
        self.exhausted = !has_more;
    }

    fn next_page(&mut self) -> Option<Vec<String>> {
        let ready = self.buffered.len() >= self.page_size
            || (self.exhausted && !self.buffered.is_empty());
        if !ready {
            return None;
        }
        let take = self.page_size.min(self.buffered.len());
        Some(self.buffered.drain(..take).collect())
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffered.is_empty()
    }
}

/// State of a ranged download between pulls.
struct RangeReader {
    client: Arc<GcsClient>,
    object: ObjectRef,
    offset: u64,
    size: u64,
    chunk_size: u64,
}

async fn next_range(mut reader: RangeReader) -> Result<Option<((ObjectRef, Bytes), RangeReader)>> {
    let (start, end) = match range_at(reader.offset, reader.chunk_size, reader.size) {
        Some(range) => range,
        None => return Ok(None),
    };

    let chunk = reader
        .client
        .get_range(&reader.object.bucket, &reader.object.key, start, end)
        .await?;

    let expected = end - start + 1;
    if chunk.len() as u64 != expected {
        return Err(Error::Network(format!(
            "Range {}-{} of {}/{} returned {} bytes",
            start,
            end,
            reader.object.bucket,
            reader.object.key,
            chunk.len()
        )));
    }

    reader.offset = end + 1;
    Ok(Some(((reader.object.clone(), chunk), reader)))
}

/// Inclusive byte range of the chunk starting at `offset`, if any remain.
fn range_at(offset: u64, chunk_size: u64, size: u64) -> Option<(u64, u64)> {
    if offset >= size {
        return None;
    }
    Some((offset, offset.saturating_add(chunk_size).min(size) - 1))
}

/// Accumulates written bytes and releases them in aligned slices.
#[derive(Debug, Default)]
struct UploadBuffer {
    pending: BytesMut,
    sent: u64,
}

impl UploadBuffer {
    /// Append `chunk`; returns the offset and bytes to send once enough is buffered.
    fn push(&mut self, chunk: &[u8]) -> Option<(u64, Bytes)> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() < UPLOAD_FLUSH_THRESHOLD {
            return None;
        }

        let aligned = self.pending.len() / UPLOAD_ALIGNMENT * UPLOAD_ALIGNMENT;
        let offset = self.sent;
        self.sent += aligned as u64;
        Some((offset, self.pending.split_to(aligned).freeze()))
    }

    /// Everything still buffered, with its offset and the final object size.
    fn finish(&mut self) -> (u64, Bytes, u64) {
        let offset = self.sent;
        let rest = self.pending.split().freeze();
        let total = offset + rest.len() as u64;
        self.sent = total;
        (offset, rest, total)
    }
}

/// Streams into a resumable upload session. The object appears only when
/// the final request carrying the total size succeeds; an abandoned session
/// is left to expire on the store.
struct GcsSink {
    client: Arc<GcsClient>,
    session: String,
    target: ObjectRef,
    buffer: UploadBuffer,
}

#[async_trait]
impl UploadSink for GcsSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if let Some((offset, data)) = self.buffer.push(&chunk) {
            self.client.put_chunk(&self.session, data, offset, None).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectRef> {
        let mut sink = self;
        let (offset, rest, total) = sink.buffer.finish();

        match sink
            .client
            .put_chunk(&sink.session, rest, offset, Some(total))
            .await?
        {
            Some(_) => Ok(sink.target.clone()),
            None => Err(Error::Network(format!(
                "Upload of {}/{} did not complete",
                sink.target.bucket, sink.target.key
            ))),
        }
    }
}

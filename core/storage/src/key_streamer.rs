//! Chunked transfers for a single key.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tracing::debug;

use uniblob_common::{KeyContext, Result};

use crate::adapter::{
    check_chunk_size, ChunkStream, ObjectRef, StorageAdapter, UploadSink, DEFAULT_CHUNK_SIZE,
};
use crate::key_storage::{require_key, timed};

/// Streamed download and upload of one object.
///
/// Obtained from [`crate::KeyStorage::stream`]. Neither direction holds the
/// whole object in memory on the disk or gcs adapters.
#[derive(Clone)]
pub struct KeyStreamer {
    context: KeyContext,
    adapter: Arc<dyn StorageAdapter>,
}

impl KeyStreamer {
    pub(crate) fn new(context: KeyContext, adapter: Arc<dyn StorageAdapter>) -> Result<Self> {
        require_key(&context, "stream")?;
        Ok(Self { context, adapter })
    }

    /// Location this streamer reads and writes.
    pub fn context(&self) -> &KeyContext {
        &self.context
    }

    /// Read the object lazily in chunks of `chunk_size` bytes, 4 MiB by default.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for a zero chunk size
    /// - `Error::NotFound` when the key does not exist
    pub async fn download(&self, chunk_size: Option<usize>) -> Result<ChunkStream> {
        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        timed("stream_download", &self.context.uri(), async {
            check_chunk_size(chunk_size)?;
            self.adapter
                .stream_download(self.context.bucket(), self.context.key(), chunk_size)
                .await
        })
        .await
    }

    /// Open a sink for writing the object chunk by chunk.
    ///
    /// The object appears once [`UploadSink::finish`] succeeds.
    pub async fn open_sink(&self) -> Result<Box<dyn UploadSink>> {
        timed("open_sink", &self.context.uri(), async {
            self.adapter
                .stream_upload(self.context.bucket(), self.context.key())
                .await
        })
        .await
    }

    /// Write every chunk of `chunks` and finish the object before returning.
    ///
    /// An error from the source or the sink abandons the write, leaving any
    /// previous object in place.
    pub async fn upload<S>(&self, chunks: S) -> Result<ObjectRef>
    where
        S: Stream<Item = Result<Bytes>> + Send,
    {
        timed("stream_upload", &self.context.uri(), async {
            let mut sink = self
                .adapter
                .stream_upload(self.context.bucket(), self.context.key())
                .await?;

            let mut chunks = Box::pin(chunks);
            let mut written = 0usize;
            while let Some(chunk) = chunks.try_next().await? {
                written += chunk.len();
                sink.write(chunk).await?;
            }

            debug!(uri = %self.context, bytes = written, "Finishing streamed upload");
            sink.finish().await
        })
        .await
    }
}

impl std::fmt::Debug for KeyStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStreamer")
            .field("context", &self.context)
            .finish()
    }
}

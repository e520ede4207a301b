//! In-memory storage adapter.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uniblob_common::{Error, Result};

use crate::adapter::{
    chunk_bytes, paginate, ChunkStream, Object, ObjectRef, PageStream, StorageAdapter, UploadSink,
};

type Buckets = HashMap<String, BTreeMap<String, Bytes>>;

/// Shared `bucket -> (key -> content)` state behind the `inmemory` adapter.
///
/// Cloning a store yields another handle onto the same state. Each operation
/// holds the lock for its own duration only, so concurrent callers interleave
/// in no particular order; callers that need isolation call [`MemoryStore::reset`]
/// between units of work or own a separate store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide store shared by every default-wired `inmemory` adapter.
    pub fn global() -> &'static MemoryStore {
        static GLOBAL: OnceLock<MemoryStore> = OnceLock::new();
        GLOBAL.get_or_init(MemoryStore::new)
    }

    /// Drop every bucket at once.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Number of objects stored in `bucket`.
    pub fn len(&self, bucket: &str) -> usize {
        self.read().get(bucket).map_or(0, BTreeMap::len)
    }

    /// Whether `bucket` holds no objects.
    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }

    fn insert(&self, bucket: &str, key: &str, content: Bytes) {
        self.write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), content);
    }

    fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.read().get(bucket).and_then(|b| b.get(key)).cloned()
    }

    // A panic while holding the lock cannot leave a half-applied insert
    // behind, so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory storage adapter.
///
/// Useful for testing and development. Deleting an absent key succeeds.
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    /// Create an adapter over `store`.
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// The store this adapter reads and writes.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "inmemory"
    }

    async fn upload(&self, bucket: &str, key: &str, content: Bytes) -> Result<ObjectRef> {
        self.store.insert(bucket, key, content);
        Ok(ObjectRef::new(bucket, key))
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Object> {
        let content = self
            .store
            .get(bucket, key)
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}/{}", bucket, key)))?;

        Ok(Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content,
        })
    }

    async fn list(&self, bucket: &str, prefix: &str, page_size: usize) -> Result<PageStream> {
        let keys: Vec<String> = {
            let buckets = self.store.read();
            match buckets.get(bucket) {
                Some(objects) => objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        paginate(bucket, keys, page_size)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        if let Some(objects) = self.store.write().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(true)
    }

    async fn stream_download(
        &self,
        bucket: &str,
        key: &str,
        chunk_size: usize,
    ) -> Result<ChunkStream> {
        let object = self.download(bucket, key).await?;
        chunk_bytes(object.object_ref(), object.content, chunk_size)
    }

    async fn stream_upload(&self, bucket: &str, key: &str) -> Result<Box<dyn UploadSink>> {
        Ok(Box::new(MemorySink {
            store: self.store.clone(),
            target: ObjectRef::new(bucket, key),
            buffer: BytesMut::new(),
        }))
    }

    async fn move_object(&self, from: &ObjectRef, to: &ObjectRef) -> Result<ObjectRef> {
        let mut buckets = self.store.write();
        let content = buckets
            .get_mut(&from.bucket)
            .and_then(|objects| objects.remove(&from.key))
            .ok_or_else(|| {
                Error::NotFound(format!("Key not found: {}/{}", from.bucket, from.key))
            })?;

        buckets
            .entry(to.bucket.clone())
            .or_default()
            .insert(to.key.clone(), content);

        Ok(to.clone())
    }
}

/// Buffers chunks until finished, then stores them in one insert.
struct MemorySink {
    store: MemoryStore,
    target: ObjectRef,
    buffer: BytesMut,
}

#[async_trait]
impl UploadSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectRef> {
        let MemorySink {
            store,
            target,
            buffer,
        } = *self;
        store.insert(&target.bucket, &target.key, buffer.freeze());
        Ok(target)
    }
}

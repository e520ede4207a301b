//! Routing facade over one `adapter://bucket/key` location.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use uniblob_common::key::render;
use uniblob_common::{Error, KeyContext, Result};

use crate::adapter::{Object, ObjectRef, Page, PageStream, StorageAdapter};
use crate::key_streamer::KeyStreamer;
use crate::registry::{AdapterKind, AdapterRegistry};

/// Run `operation` against `uri`, logging its start and its outcome.
///
/// Errors are logged and returned unchanged.
pub(crate) async fn timed<T, F>(operation: &'static str, uri: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(operation, uri = %uri, "Storage operation started");
    let started = Instant::now();

    let result = fut.await;

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    match &result {
        Ok(_) => info!(operation, uri = %uri, duration_ms, "Storage operation finished"),
        Err(e) => warn!(operation, uri = %uri, duration_ms, error = %e, "Storage operation failed"),
    }
    result
}

/// Reject contexts that address a whole bucket.
pub(crate) fn require_key(context: &KeyContext, operation: &str) -> Result<()> {
    if context.is_bucket() {
        return Err(Error::InvalidInput(format!(
            "{} needs a key, got bucket URI {}",
            operation,
            context.uri()
        )));
    }
    Ok(())
}

/// Storage operations for one key, routed to the adapter its URI names.
///
/// The adapter is resolved when the `KeyStorage` is built, so an unknown
/// scheme fails before any I/O is attempted.
#[derive(Clone)]
pub struct KeyStorage {
    context: KeyContext,
    kind: AdapterKind,
    adapter: Arc<dyn StorageAdapter>,
}

impl KeyStorage {
    /// Create storage for `adapter://bucket/key` from already-split parts.
    ///
    /// # Errors
    /// - `Error::KeyParse` for an empty adapter or bucket
    /// - `Error::UnknownAdapter` when `adapter` is not registered
    pub fn new(registry: &AdapterRegistry, adapter: &str, bucket: &str, key: &str) -> Result<Self> {
        Self::from_context(registry, KeyContext::new(adapter, bucket, key)?)
    }

    /// Create storage for a raw URI.
    pub fn for_uri(registry: &AdapterRegistry, uri: &str) -> Result<Self> {
        Self::from_context(registry, KeyContext::parse(uri)?)
    }

    /// Create storage for a parsed context.
    pub fn from_context(registry: &AdapterRegistry, context: KeyContext) -> Result<Self> {
        let kind: AdapterKind = context.adapter().parse()?;
        let adapter = registry.resolve_kind(kind)?;
        Ok(Self {
            context,
            kind,
            adapter,
        })
    }

    /// Parsed location this storage addresses.
    pub fn context(&self) -> &KeyContext {
        &self.context
    }

    /// Adapter this storage routes to.
    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    /// Source URI, rendered as `adapter://bucket/key`.
    pub fn uri(&self) -> String {
        self.context.uri()
    }

    /// Fetch the whole object.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for a bucket URI
    /// - `Error::NotFound` when the key does not exist
    pub async fn download(&self) -> Result<Object> {
        timed("download", &self.uri(), async {
            require_key(&self.context, "download")?;
            self.adapter
                .download(self.context.bucket(), self.context.key())
                .await
        })
        .await
    }

    /// Store `content`, replacing any previous object at this key.
    pub async fn upload(&self, content: impl Into<Bytes>) -> Result<ObjectRef> {
        let content = content.into();
        timed("upload", &self.uri(), async {
            require_key(&self.context, "upload")?;
            self.adapter
                .upload(self.context.bucket(), self.context.key(), content)
                .await
        })
        .await
    }

    /// List every key under this URI, as fully qualified URIs.
    ///
    /// The key acts as a plain string prefix; a bucket URI lists the whole
    /// bucket. Pages hold at most `page_size` entries.
    pub async fn list(&self, page_size: usize) -> Result<PageStream> {
        timed(
            "list",
            &self.uri(),
            self.list_uris(self.context.key(), page_size),
        )
        .await
    }

    /// Remove the object. Returns `true` on success.
    ///
    /// Removing an absent key succeeds on `inmemory` and fails with
    /// `NotFound` on `disk` and `gcs`.
    pub async fn delete(&self) -> Result<bool> {
        timed("delete", &self.uri(), async {
            require_key(&self.context, "delete")?;
            self.adapter
                .delete(self.context.bucket(), self.context.key())
                .await
        })
        .await
    }

    /// Whether an object is stored at exactly this key.
    ///
    /// A listing of one entry is compared against this URI, so an object
    /// that merely starts with this key does not count.
    pub async fn exists(&self) -> Result<bool> {
        timed("exists", &self.uri(), async {
            let key = self.adapter.normalize_key(self.context.key());
            let expected = render(self.context.adapter(), self.context.bucket(), &key);

            let mut pages = self.list_uris(&key, 1).await?;
            Ok(match pages.try_next().await? {
                Some(page) => page.keys.first() == Some(&expected),
                None => false,
            })
        })
        .await
    }

    /// Rename this object to `destination`, which must use the same adapter.
    ///
    /// Returns the destination URI.
    ///
    /// # Errors
    /// - `Error::InvalidInput` when the destination names another adapter or
    ///   either side is a bucket URI
    /// - `Error::Unsupported` when the adapter cannot move objects
    pub async fn move_to(&self, destination: &str) -> Result<String> {
        timed("move", &self.uri(), async {
            require_key(&self.context, "move")?;

            let target = KeyContext::parse(destination)?;
            if target.adapter() != self.context.adapter() {
                return Err(Error::InvalidInput(format!(
                    "cannot move {} across adapters to {}",
                    self.uri(),
                    destination
                )));
            }
            require_key(&target, "move")?;

            let from = ObjectRef::new(self.context.bucket(), self.context.key());
            let to = ObjectRef::new(target.bucket(), target.key());
            let moved = self.adapter.move_object(&from, &to).await?;

            Ok(render(self.context.adapter(), &moved.bucket, &moved.key))
        })
        .await
    }

    /// Chunked transfer handle for this key.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for a bucket URI
    pub fn stream(&self) -> Result<KeyStreamer> {
        KeyStreamer::new(self.context.clone(), self.adapter.clone())
    }

    async fn list_uris(&self, prefix: &str, page_size: usize) -> Result<PageStream> {
        let pages = self
            .adapter
            .list(self.context.bucket(), prefix, page_size)
            .await?;

        let adapter = self.context.adapter().to_string();
        Ok(Box::pin(pages.map_ok(move |page| {
            let keys = page
                .keys
                .iter()
                .map(|key| render(&adapter, &page.bucket, key))
                .collect();
            Page {
                bucket: page.bucket,
                keys,
            }
        })))
    }
}

impl std::fmt::Debug for KeyStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStorage")
            .field("context", &self.context)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::memory::MemoryStore;
    use tempfile::TempDir;

    fn memory_registry() -> AdapterRegistry {
        AdapterRegistry::with_store(StorageConfig::default(), MemoryStore::new())
    }

    fn disk_registry(temp: &TempDir) -> AdapterRegistry {
        let mut config = StorageConfig::default();
        config.disk.base_dir = temp.path().to_path_buf();
        AdapterRegistry::new(config)
    }

    async fn list_all(storage: &KeyStorage, page_size: usize) -> Vec<Page> {
        storage
            .list(page_size)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://b/p/f.xml").unwrap();

        storage.upload("hello world").await.unwrap();

        let object = storage.download().await.unwrap();
        assert_eq!(object.bucket, "b");
        assert_eq!(object.key, "p/f.xml");
        assert_eq!(object.content, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_list_renders_uris() {
        let registry = memory_registry();
        for key in ["a/1", "a/2", "b/1"] {
            KeyStorage::new(&registry, "inmemory", "X", key)
                .unwrap()
                .upload(Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let storage = KeyStorage::for_uri(&registry, "inmemory://X/a").unwrap();
        let pages = list_all(&storage, 10).await;

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].bucket, "X");
        assert_eq!(
            pages[0].keys,
            vec!["inmemory://X/a/1".to_string(), "inmemory://X/a/2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_whole_bucket_in_pages() {
        let registry = memory_registry();
        for i in 0..5 {
            KeyStorage::new(&registry, "inmemory", "b", &format!("k{}", i))
                .unwrap()
                .upload(Bytes::new())
                .await
                .unwrap();
        }

        let storage = KeyStorage::for_uri(&registry, "inmemory://b").unwrap();
        let pages = list_all(&storage, 2).await;

        let sizes: Vec<usize> = pages.iter().map(|p| p.keys.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://nothing/here").unwrap();
        assert!(list_all(&storage, 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_exists_exact_key_only() {
        let registry = memory_registry();
        KeyStorage::for_uri(&registry, "inmemory://b/2019-01/f.xml")
            .unwrap()
            .upload("x")
            .await
            .unwrap();

        let exact = KeyStorage::for_uri(&registry, "inmemory://b/2019-01/f.xml").unwrap();
        let prefix = KeyStorage::for_uri(&registry, "inmemory://b/2019-01").unwrap();
        let other_bucket = KeyStorage::for_uri(&registry, "inmemory://c/2019-01/f.xml").unwrap();

        assert!(exact.exists().await.unwrap());
        assert!(!prefix.exists().await.unwrap());
        assert!(!other_bucket.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_uses_disk_key_form() {
        let temp = TempDir::new().unwrap();
        let registry = disk_registry(&temp);
        let storage = KeyStorage::new(&registry, "disk", "b", "my report.txt").unwrap();

        assert!(!storage.exists().await.unwrap());
        storage.upload("x").await.unwrap();
        assert!(storage.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_matches_download_for_unnormalized_disk_keys() {
        let temp = TempDir::new().unwrap();
        let registry = disk_registry(&temp);

        for uri in ["disk://b/a//f", "disk://b/x/../g"] {
            let storage = KeyStorage::for_uri(&registry, uri).unwrap();
            storage.upload("x").await.unwrap();

            assert_eq!(storage.download().await.unwrap().content, "x", "{}", uri);
            assert!(storage.exists().await.unwrap(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_disk_uri_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let registry = disk_registry(&temp);

        for uri in ["disk://b/../../x", "disk://b/a/../../x", "disk://b/.."] {
            let storage = KeyStorage::for_uri(&registry, uri).unwrap();
            let err = storage.upload("x").await.unwrap_err();
            assert!(matches!(err, Error::OutsideBaseDirectory(_)), "{} -> {:?}", uri, err);
        }

        assert!(!temp.path().join("x").exists());
        assert!(!temp.path().join("b").join("x").exists());
    }

    #[tokio::test]
    async fn test_dot_segments_address_literal_memory_keys() {
        let registry = memory_registry();
        KeyStorage::for_uri(&registry, "inmemory://b/a/../c")
            .unwrap()
            .upload("literal")
            .await
            .unwrap();

        let plain = KeyStorage::for_uri(&registry, "inmemory://b/c").unwrap();
        assert!(!plain.exists().await.unwrap());

        let object = KeyStorage::for_uri(&registry, "inmemory://b/a/../c")
            .unwrap()
            .download()
            .await
            .unwrap();
        assert_eq!(object.key, "a/../c");
    }

    #[tokio::test]
    async fn test_delete_then_download_fails() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://b/k").unwrap();
        storage.upload("x").await.unwrap();

        assert!(storage.delete().await.unwrap());
        assert!(storage.download().await.unwrap_err().is_not_found());
        assert!(!storage.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_bucket_uri_rejected_for_single_object_ops() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://b/").unwrap();

        assert!(matches!(storage.download().await, Err(Error::InvalidInput(_))));
        assert!(matches!(storage.upload("x").await, Err(Error::InvalidInput(_))));
        assert!(matches!(storage.delete().await, Err(Error::InvalidInput(_))));
        assert!(matches!(storage.stream(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_adapter_fails_at_construction() {
        let registry = memory_registry();
        let err = KeyStorage::for_uri(&registry, "s3://b/k").unwrap_err();
        assert!(matches!(err, Error::UnknownAdapter(name) if name == "s3"));
    }

    #[test]
    fn test_uri_round_trip() {
        let registry = memory_registry();
        let storage = KeyStorage::new(&registry, "inmemory", "b", "a/b.txt").unwrap();
        assert_eq!(storage.uri(), "inmemory://b/a/b.txt");
        assert_eq!(storage.kind(), AdapterKind::InMemory);
    }

    #[tokio::test]
    async fn test_move_within_adapter() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://b/old").unwrap();
        storage.upload("payload").await.unwrap();

        let moved = storage.move_to("inmemory://c/new").await.unwrap();
        assert_eq!(moved, "inmemory://c/new");

        assert!(!storage.exists().await.unwrap());
        let target = KeyStorage::for_uri(&registry, &moved).unwrap();
        assert_eq!(target.download().await.unwrap().content, "payload");
    }

    #[tokio::test]
    async fn test_move_across_adapters_rejected() {
        let registry = memory_registry();
        let storage = KeyStorage::for_uri(&registry, "inmemory://b/old").unwrap();
        storage.upload("payload").await.unwrap();

        let err = storage.move_to("disk://b/new").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(storage.exists().await.unwrap());
    }
}

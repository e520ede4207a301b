//! Local filesystem storage adapter.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use uniblob_common::{Error, Result};

use crate::adapter::{
    check_chunk_size, check_page_size, paginate, ChunkStream, Object, ObjectRef, PageStream,
    StorageAdapter, UploadSink,
};

/// Prefix of in-flight upload files. `~` never survives key sanitization,
/// so no stored key can start with it.
const TEMP_PREFIX: &str = ".~";

/// Local filesystem storage adapter.
///
/// Each bucket is a subdirectory of the base directory and each key a file
/// path below it. Characters outside `[A-Za-z0-9._/-]` are replaced with `_`.
/// Deleting an absent key fails with `Error::NotFound`, and so does any key
/// that names an intermediate directory rather than a file.
pub struct DiskAdapter {
    base: PathBuf,
}

impl DiskAdapter {
    /// Create a new disk adapter rooted at `base`.
    ///
    /// # Postconditions
    /// - Base directory exists and is stored in canonical form
    ///
    /// # Errors
    /// - Permission denied
    /// - Base path is not a directory
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();

        // Sync is fine here; adapters are built once per resolution.
        if !base.exists() {
            std::fs::create_dir_all(base)?;
        }
        let base = std::fs::canonicalize(base)?;
        if !base.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Disk base is not a directory: {}",
                base.display()
            )));
        }

        Ok(Self { base })
    }

    /// Canonical base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a bucket and key to a file path without touching the disk.
    ///
    /// `..` may not climb above the bucket directory and absolute keys are
    /// rejected outright.
    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.bucket_dir(bucket)?;
        let mut depth = 0usize;

        for component in Path::new(&sanitize(key, false)).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    path.pop();
                    depth -= 1;
                }
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::OutsideBaseDirectory(format!("{}/{}", bucket, key)));
                }
            }
        }

        if depth == 0 {
            return Err(Error::InvalidInput(format!(
                "Key does not name a file: {}/{}",
                bucket, key
            )));
        }

        Ok(path)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        let name = sanitize(bucket, true);
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::OutsideBaseDirectory(bucket.to_string()));
        }
        Ok(self.base.join(name))
    }

    /// Fail unless `path` is inside the base once symlinks are followed.
    fn ensure_inside(&self, canonical: &Path, original: &Path) -> Result<()> {
        if canonical.starts_with(&self.base) {
            Ok(())
        } else {
            Err(Error::OutsideBaseDirectory(original.display().to_string()))
        }
    }

    /// Create the parent directories of `path` and check where they landed.
    async fn prepare_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
            let canonical = fs::canonicalize(parent).await?;
            self.ensure_inside(&canonical, path)?;
        }
        Ok(())
    }

    /// Check that an existing file resolves inside the base.
    async fn existing_file(&self, path: &Path, bucket: &str, key: &str) -> Result<()> {
        let canonical = fs::canonicalize(path).await.map_err(|e| not_found(e, bucket, key))?;
        self.ensure_inside(&canonical, path)?;

        if canonical.is_dir() {
            return Err(Error::NotFound(format!(
                "No object at directory key: {}/{}",
                bucket, key
            )));
        }
        Ok(())
    }

    fn object_ref(&self, bucket: &str, key: &str) -> ObjectRef {
        ObjectRef::new(bucket, self.normalize_key(key))
    }
}

#[async_trait]
impl StorageAdapter for DiskAdapter {
    fn name(&self) -> &str {
        "disk"
    }

    fn normalize_key(&self, key: &str) -> String {
        let sanitized = sanitize(key, false);
        let mut parts: Vec<&str> = Vec::new();
        for part in sanitized.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                _ => parts.push(part),
            }
        }
        parts.join("/")
    }

    async fn upload(&self, bucket: &str, key: &str, content: Bytes) -> Result<ObjectRef> {
        let mut sink = self.open_sink(bucket, key).await?;
        sink.write(content).await?;
        Box::new(sink).finish().await
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Object> {
        let path = self.resolve(bucket, key)?;
        self.existing_file(&path, bucket, key).await?;

        let content = fs::read(&path).await.map_err(|e| not_found(e, bucket, key))?;
        let object = self.object_ref(bucket, key);

        Ok(Object {
            bucket: object.bucket,
            key: object.key,
            content: Bytes::from(content),
        })
    }

    async fn list(&self, bucket: &str, prefix: &str, page_size: usize) -> Result<PageStream> {
        check_page_size(page_size)?;
        let root = self.bucket_dir(bucket)?;
        let prefix = sanitize(prefix, false);

        let mut keys = Vec::new();
        if fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
            let mut pending = vec![(root, String::new())];

            while let Some((dir, relative)) = pending.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = match entry.file_name().to_str() {
                        Some(name) => name.to_string(),
                        None => continue,
                    };
                    let key = if relative.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", relative, name)
                    };

                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        pending.push((entry.path(), key));
                    } else if file_type.is_file()
                        && !name.starts_with(TEMP_PREFIX)
                        && key.starts_with(&prefix)
                    {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        paginate(bucket, keys, page_size)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.resolve(bucket, key)?;
        self.existing_file(&path, bucket, key).await?;

        fs::remove_file(&path)
            .await
            .map_err(|e| not_found(e, bucket, key))?;
        Ok(true)
    }

    async fn stream_download(
        &self,
        bucket: &str,
        key: &str,
        chunk_size: usize,
    ) -> Result<ChunkStream> {
        check_chunk_size(chunk_size)?;
        let path = self.resolve(bucket, key)?;
        self.existing_file(&path, bucket, key).await?;

        let file = File::open(&path).await.map_err(|e| not_found(e, bucket, key))?;
        let object = self.object_ref(bucket, key);

        let chunks = stream::try_unfold(file, move |mut file| {
            let object = object.clone();
            async move {
                read_chunk(&mut file, chunk_size)
                    .await
                    .map(|chunk| chunk.map(|bytes| ((object, bytes), file)))
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn stream_upload(&self, bucket: &str, key: &str) -> Result<Box<dyn UploadSink>> {
        Ok(Box::new(self.open_sink(bucket, key).await?))
    }

    async fn move_object(&self, from: &ObjectRef, to: &ObjectRef) -> Result<ObjectRef> {
        let source = self.resolve(&from.bucket, &from.key)?;
        let target = self.resolve(&to.bucket, &to.key)?;
        self.existing_file(&source, &from.bucket, &from.key).await?;
        self.prepare_parent(&target).await?;

        fs::rename(&source, &target).await?;
        Ok(self.object_ref(&to.bucket, &to.key))
    }
}

impl DiskAdapter {
    async fn open_sink(&self, bucket: &str, key: &str) -> Result<DiskSink> {
        let target = self.resolve(bucket, key)?;
        self.prepare_parent(&target).await?;

        let temp = target.with_file_name(format!("{}{}.tmp", TEMP_PREFIX, Uuid::new_v4()));
        let file = File::create(&temp).await?;

        Ok(DiskSink {
            file: Some(file),
            temp,
            target,
            object: self.object_ref(bucket, key),
        })
    }
}

/// Writes into a hidden temp file next to the target and renames it into
/// place on finish, so readers only ever see complete files.
struct DiskSink {
    file: Option<File>,
    temp: PathBuf,
    target: PathBuf,
    object: ObjectRef,
}

impl DiskSink {
    async fn commit(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::Storage("upload sink already closed".to_string()))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&self.temp, &self.target).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadSink for DiskSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Storage("upload sink already closed".to_string()))?;
        file.write_all(&chunk).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<ObjectRef> {
        let mut sink = self;
        if let Err(e) = sink.commit().await {
            let _ = fs::remove_file(&sink.temp).await;
            return Err(e);
        }
        Ok(sink.object.clone())
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        // Abandoned before finish: the temp file must not linger.
        if self.file.is_some() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Read up to `chunk_size` bytes; `None` once the file is exhausted.
///
/// The buffer grows with what is actually read, so an oversized
/// `chunk_size` costs no more than the bytes left in the file.
async fn read_chunk(file: &mut File, chunk_size: usize) -> Result<Option<Bytes>> {
    let limit = u64::try_from(chunk_size).unwrap_or(u64::MAX);
    let mut buf = Vec::new();
    (&mut *file).take(limit).read_to_end(&mut buf).await?;

    if buf.is_empty() {
        return Ok(None);
    }
    Ok(Some(Bytes::from(buf)))
}

/// Replace characters that could break a path.
fn sanitize(raw: &str, is_bucket: bool) -> String {
    raw.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            '/' if !is_bucket => c,
            _ => '_',
        })
        .collect()
}

fn not_found(err: std::io::Error, bucket: &str, key: &str) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("File not found: {}/{}", bucket, key))
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn adapter() -> (TempDir, DiskAdapter) {
        let temp = TempDir::new().unwrap();
        let adapter = DiskAdapter::new(temp.path().join("base")).unwrap();
        (temp, adapter)
    }

    async fn list_all(adapter: &DiskAdapter, bucket: &str, prefix: &str) -> Vec<String> {
        let pages: Vec<_> = adapter
            .list(bucket, prefix, 2)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        pages.into_iter().flat_map(|p| p.keys).collect()
    }

    #[tokio::test]
    async fn test_disk_upload_download() {
        let (_temp, adapter) = adapter();
        let data = Bytes::from_static(b"Hello, Disk!");

        let stored = adapter.upload("b", "p/f.xml", data.clone()).await.unwrap();
        assert_eq!(stored, ObjectRef::new("b", "p/f.xml"));

        let object = adapter.download("b", "p/f.xml").await.unwrap();
        assert_eq!(object.content, data);
        assert!(adapter.base().join("b/p/f.xml").is_file());
    }

    #[tokio::test]
    async fn test_disk_overwrite_replaces() {
        let (_temp, adapter) = adapter();
        adapter.upload("b", "k", Bytes::from_static(b"long content")).await.unwrap();
        adapter.upload("b", "k", Bytes::from_static(b"short")).await.unwrap();

        assert_eq!(adapter.download("b", "k").await.unwrap().content, "short");
    }

    #[tokio::test]
    async fn test_disk_rejects_traversal() {
        let (_temp, adapter) = adapter();

        for key in ["../../etc/passwd", "a/../../x", "../sibling/file"] {
            let err = adapter
                .upload("b", key, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::OutsideBaseDirectory(_)), "{}", key);
            assert!(err.is_invalid_argument());

            let err = adapter.download("b", key).await.unwrap_err();
            assert!(matches!(err, Error::OutsideBaseDirectory(_)), "{}", key);
        }

        assert!(matches!(
            adapter.download("..", "x").await.unwrap_err(),
            Error::OutsideBaseDirectory(_)
        ));
    }

    #[tokio::test]
    async fn test_disk_sanitizes_keys() {
        let (_temp, adapter) = adapter();
        let stored = adapter
            .upload("b", "dir/my file?.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(stored.key, "dir/my_file_.txt");
        assert_eq!(adapter.normalize_key("dir//my file?.txt"), "dir/my_file_.txt");
        assert_eq!(list_all(&adapter, "b", "").await, vec!["dir/my_file_.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_disk_list_recursive_prefix() {
        let (_temp, adapter) = adapter();
        for key in ["a/1", "a/2", "a/deep/3", "ab", "b/1"] {
            adapter.upload("X", key, Bytes::new()).await.unwrap();
        }
        adapter.upload("Y", "a/9", Bytes::new()).await.unwrap();

        assert_eq!(
            list_all(&adapter, "X", "a/").await,
            vec!["a/1".to_string(), "a/2".to_string(), "a/deep/3".to_string()]
        );
        assert_eq!(list_all(&adapter, "X", "a").await.len(), 4);
        assert!(list_all(&adapter, "missing", "").await.is_empty());
    }

    #[tokio::test]
    async fn test_disk_missing_key_is_not_found() {
        let (_temp, adapter) = adapter();

        assert!(adapter.download("b", "nope").await.unwrap_err().is_not_found());
        assert!(adapter.delete("b", "nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_disk_delete() {
        let (_temp, adapter) = adapter();
        adapter.upload("b", "k", Bytes::from_static(b"x")).await.unwrap();

        assert!(adapter.delete("b", "k").await.unwrap());
        assert!(adapter.download("b", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_disk_stream_download_chunks() {
        let (_temp, adapter) = adapter();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        adapter.upload("b", "big", Bytes::from(data.clone())).await.unwrap();

        let chunks: Vec<(ObjectRef, Bytes)> = adapter
            .stream_download("b", "big", 4096)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let sizes: Vec<usize> = chunks.iter().map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|(_, c)| c.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_disk_stream_oversized_chunk_size() {
        let (_temp, adapter) = adapter();
        adapter.upload("b", "tiny", Bytes::from_static(b"abcd")).await.unwrap();

        let chunks: Vec<Bytes> = adapter
            .stream_download("b", "tiny", usize::MAX)
            .await
            .unwrap()
            .map_ok(|(_, chunk)| chunk)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"abcd")]);
    }

    #[tokio::test]
    async fn test_disk_directory_key_is_not_found() {
        let (_temp, adapter) = adapter();
        adapter.upload("b", "a/b", Bytes::from_static(b"x")).await.unwrap();

        assert!(adapter.download("b", "a").await.unwrap_err().is_not_found());
        assert!(adapter.delete("b", "a").await.unwrap_err().is_not_found());
        assert!(adapter.base().join("b/a/b").is_file());
    }

    #[test]
    fn test_disk_normalize_matches_resolution() {
        let (_temp, adapter) = adapter();
        assert_eq!(adapter.normalize_key("a//f"), "a/f");
        assert_eq!(adapter.normalize_key("./a/x/../f"), "a/f");
    }

    #[tokio::test]
    async fn test_disk_sink_visible_only_after_finish() {
        let (_temp, adapter) = adapter();
        let mut sink = adapter.stream_upload("b", "s/obj").await.unwrap();
        sink.write(Bytes::from_static(b"part1-")).await.unwrap();
        sink.write(Bytes::from_static(b"part2")).await.unwrap();

        assert!(adapter.download("b", "s/obj").await.is_err());
        assert!(list_all(&adapter, "b", "").await.is_empty());

        sink.finish().await.unwrap();
        assert_eq!(adapter.download("b", "s/obj").await.unwrap().content, "part1-part2");
    }

    #[tokio::test]
    async fn test_disk_abandoned_sink_leaves_nothing() {
        let (_temp, adapter) = adapter();
        {
            let mut sink = adapter.stream_upload("b", "gone").await.unwrap();
            sink.write(Bytes::from_static(b"x")).await.unwrap();
        }

        let leftovers = std::fs::read_dir(adapter.base().join("b")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_disk_move() {
        let (_temp, adapter) = adapter();
        adapter.upload("b", "from", Bytes::from_static(b"x")).await.unwrap();

        let moved = adapter
            .move_object(&ObjectRef::new("b", "from"), &ObjectRef::new("c", "to/here"))
            .await
            .unwrap();
        assert_eq!(moved, ObjectRef::new("c", "to/here"));
        assert!(adapter.download("b", "from").await.unwrap_err().is_not_found());
        assert_eq!(adapter.download("c", "to/here").await.unwrap().content, "x");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disk_rejects_symlink_escape() {
        let (temp, adapter) = adapter();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret"), b"s").unwrap();
        std::fs::create_dir_all(adapter.base().join("b")).unwrap();
        std::os::unix::fs::symlink(&outside, adapter.base().join("b/link")).unwrap();

        let err = adapter.download("b", "link/secret").await.unwrap_err();
        assert!(matches!(err, Error::OutsideBaseDirectory(_)));
    }
}

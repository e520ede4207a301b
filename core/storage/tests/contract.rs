//! Behaviour every adapter must share, run against each local backend.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, TryStreamExt};
use tempfile::TempDir;

use uniblob_storage::{
    AdapterRegistry, DiskAdapter, KeyStorage, MemoryAdapter, MemoryStore, Page, StorageAdapter,
    StorageConfig,
};

/// Adapter under test plus whatever keeps its backing state alive.
struct Fixture {
    adapter: Arc<dyn StorageAdapter>,
    _temp: Option<TempDir>,
}

fn fixtures() -> Vec<Fixture> {
    let temp = TempDir::new().unwrap();
    let disk = DiskAdapter::new(temp.path()).unwrap();

    vec![
        Fixture {
            adapter: Arc::new(MemoryAdapter::default()),
            _temp: None,
        },
        Fixture {
            adapter: Arc::new(disk),
            _temp: Some(temp),
        },
    ]
}

async fn list_pages(adapter: &dyn StorageAdapter, bucket: &str, prefix: &str, size: usize) -> Vec<Page> {
    adapter
        .list(bucket, prefix, size)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

#[tokio::test]
async fn upload_then_download_returns_same_bytes() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        let content = Bytes::from_static(b"<xml>payload</xml>");

        adapter.upload("bucket", "2019-01/f.xml", content.clone()).await.unwrap();
        let object = adapter.download("bucket", "2019-01/f.xml").await.unwrap();

        assert_eq!(object.bucket, "bucket", "{}", adapter.name());
        assert_eq!(object.key, "2019-01/f.xml", "{}", adapter.name());
        assert_eq!(object.content, content, "{}", adapter.name());
    }
}

#[tokio::test]
async fn overwrite_replaces_content() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();

        adapter.upload("b", "k", Bytes::from_static(b"first, longer")).await.unwrap();
        adapter.upload("b", "k", Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(adapter.download("b", "k").await.unwrap().content, "second", "{}", adapter.name());
    }
}

#[tokio::test]
async fn empty_object_round_trips() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();

        adapter.upload("b", "empty", Bytes::new()).await.unwrap();
        assert!(adapter.download("b", "empty").await.unwrap().content.is_empty());
    }
}

#[tokio::test]
async fn buckets_are_isolated() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();

        adapter.upload("left", "k", Bytes::from_static(b"1")).await.unwrap();

        assert!(adapter.download("right", "k").await.unwrap_err().is_not_found());
        assert!(list_pages(adapter, "right", "", 10).await.is_empty());
    }
}

#[tokio::test]
async fn listing_partitions_without_duplicates() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        let expected: Vec<String> = (0..23).map(|i| format!("data/{:03}", i)).collect();
        for key in &expected {
            adapter.upload("b", key, Bytes::from_static(b"x")).await.unwrap();
        }
        adapter.upload("b", "other/skip", Bytes::new()).await.unwrap();

        for page_size in [1, 5, 23, 100] {
            let pages = list_pages(adapter, "b", "data/", page_size).await;

            assert!(pages.iter().all(|p| !p.keys.is_empty() && p.keys.len() <= page_size));
            assert!(pages.iter().all(|p| p.bucket == "b"));

            let keys: Vec<String> = pages.into_iter().flat_map(|p| p.keys).collect();
            let unique: HashSet<&String> = keys.iter().collect();
            assert_eq!(unique.len(), keys.len(), "{} page {}", adapter.name(), page_size);
            assert_eq!(keys, expected, "{} page {}", adapter.name(), page_size);
        }
    }
}

#[tokio::test]
async fn listing_prefix_is_plain_string() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        for key in ["2019-01/a", "2019-01b", "2019-02/c"] {
            adapter.upload("b", key, Bytes::new()).await.unwrap();
        }

        let keys: Vec<String> = list_pages(adapter, "b", "2019-01", 10)
            .await
            .into_iter()
            .flat_map(|p| p.keys)
            .collect();
        assert_eq!(keys, vec!["2019-01/a".to_string(), "2019-01b".to_string()]);
    }
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
    for fixture in fixtures() {
        let err = fixture.adapter.list("b", "", 0).await.err().unwrap();
        assert!(err.is_invalid_argument(), "{}", fixture.adapter.name());
    }
}

#[tokio::test]
async fn delete_removes_object() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        adapter.upload("b", "gone", Bytes::from_static(b"x")).await.unwrap();

        assert!(adapter.delete("b", "gone").await.unwrap());
        assert!(adapter.download("b", "gone").await.unwrap_err().is_not_found());
        assert!(list_pages(adapter, "b", "gone", 10).await.is_empty());
    }
}

#[tokio::test]
async fn streamed_download_reassembles() {
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        adapter.upload("b", "small", Bytes::from_static(b"tiny")).await.unwrap();
        adapter.upload("b", "large", Bytes::from(payload.clone())).await.unwrap();

        let small: Vec<Bytes> = adapter
            .stream_download("b", "small", 1024)
            .await
            .unwrap()
            .map_ok(|(_, chunk)| chunk)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(small, vec![Bytes::from_static(b"tiny")]);

        let large: Vec<Bytes> = adapter
            .stream_download("b", "large", 1024)
            .await
            .unwrap()
            .map_ok(|(_, chunk)| chunk)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(large.len(), 10);
        assert!(large[..9].iter().all(|c| c.len() == 1024));
        assert_eq!(large.concat(), payload, "{}", adapter.name());
    }
}

#[tokio::test]
async fn streamed_upload_matches_whole_upload() {
    for fixture in fixtures() {
        let adapter = fixture.adapter.as_ref();
        let mut sink = adapter.stream_upload("b", "joined").await.unwrap();
        for part in ["alpha-", "beta-", "gamma"] {
            sink.write(Bytes::from(part)).await.unwrap();
        }
        sink.finish().await.unwrap();

        assert_eq!(adapter.download("b", "joined").await.unwrap().content, "alpha-beta-gamma");
    }
}

#[tokio::test]
async fn key_storage_routes_by_scheme() {
    let temp = TempDir::new().unwrap();
    let mut config = StorageConfig::default();
    config.disk.base_dir = temp.path().to_path_buf();
    let registry = AdapterRegistry::with_store(config, MemoryStore::new());

    for uri in ["inmemory://reports/2019-01/f.xml", "disk://reports/2019-01/f.xml"] {
        let storage = KeyStorage::for_uri(&registry, uri).unwrap();
        assert!(!storage.exists().await.unwrap());

        storage.upload("content").await.unwrap();
        assert!(storage.exists().await.unwrap());

        let listed: Vec<String> = KeyStorage::for_uri(&registry, &uri.replace("/f.xml", ""))
            .unwrap()
            .list(10)
            .await
            .unwrap()
            .map_ok(|page| page.keys)
            .try_concat()
            .await
            .unwrap();
        assert_eq!(listed, vec![uri.to_string()]);

        let streamed = storage
            .stream()
            .unwrap()
            .upload(stream::iter(vec![Ok(Bytes::from_static(b"v2"))]))
            .await
            .unwrap();
        assert_eq!(streamed.key, "2019-01/f.xml");
        assert_eq!(storage.download().await.unwrap().content, "v2");

        assert!(storage.delete().await.unwrap());
        assert!(!storage.exists().await.unwrap());
    }
}

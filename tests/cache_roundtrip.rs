//! Storage-backed cache round-trip and blob-serve coverage (spec.md §8
//! properties 11–12).

use nixery::cache::{LayerCache, ManifestCache};
use nixery::manifest::LayerDescriptor;
use nixery::storage::{ByteRange, FilesystemBackend, ServeResponse, StorageBackend};
use std::sync::Arc;

fn backend() -> (tempfile::TempDir, Arc<dyn StorageBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new(dir.path().to_path_buf()));
    (dir, backend)
}

#[tokio::test]
async fn manifest_round_trips_through_the_backend() {
    let (_dir, backend) = backend();
    let scratch = tempfile::tempdir().unwrap();
    let cache = ManifestCache::new(scratch.path().to_path_buf(), backend.clone());

    let bytes = br#"{"schemaVersion":2}"#.to_vec();
    cache.put("fingerprint-123", &bytes).await.unwrap();

    let fetched = cache.get("fingerprint-123").await.unwrap();
    assert_eq!(fetched, Some(bytes.clone()));

    // Persisted under the documented prefix, independent of the in-process tier.
    let fresh_cache = ManifestCache::new(tempfile::tempdir().unwrap().path().to_path_buf(), backend);
    let fetched_from_tier2 = fresh_cache.get("fingerprint-123").await.unwrap();
    assert_eq!(fetched_from_tier2, Some(bytes));
}

#[tokio::test]
async fn manifest_cache_miss_is_not_an_error() {
    let (_dir, backend) = backend();
    let scratch = tempfile::tempdir().unwrap();
    let cache = ManifestCache::new(scratch.path().to_path_buf(), backend);

    assert_eq!(cache.get("never-cached").await.unwrap(), None);
}

#[tokio::test]
async fn layer_descriptor_round_trips_through_the_backend() {
    let (_dir, backend) = backend();
    let cache = LayerCache::new(backend.clone());

    let descriptor = LayerDescriptor {
        digest: "sha256:aaaa".to_string(),
        size: 42,
        diff_id: "sha256:bbbb".to_string(),
        merge_rating: 7,
    };

    cache.put("layer-key", descriptor).await.unwrap();

    let fresh_cache = LayerCache::new(backend);
    let fetched = fresh_cache.get("layer-key").await.unwrap().expect("cached descriptor");
    assert_eq!(fetched.digest, "sha256:aaaa");
    assert_eq!(fetched.size, 42);
    assert_eq!(fetched.diff_id, "sha256:bbbb");
    assert_eq!(fetched.merge_rating, 7);
}

#[tokio::test]
async fn filesystem_backend_serves_persisted_blob() {
    let (_dir, backend) = backend();

    backend
        .persist("layers/deadbeef", "application/gzip", {
            Box::new(|sink| {
                use std::io::Write;
                sink.write_all(b"layer-bytes")?;
                Ok(nixery::storage::PersistOutcome {
                    digest: "sha256:deadbeef".to_string(),
                    size: 11,
                    pre_transform_digest: None,
                })
            })
        })
        .await
        .unwrap();

    match backend.serve("sha256:deadbeef", None).await.unwrap() {
        ServeResponse::Stream { mut reader, size, range } => {
            use tokio::io::AsyncReadExt;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await.unwrap();
            assert_eq!(bytes, b"layer-bytes");
            assert_eq!(size, 11);
            assert!(range.is_none());
        }
        ServeResponse::Redirect { .. } => panic!("filesystem backend should stream, not redirect"),
    }
}

#[tokio::test]
async fn filesystem_backend_serves_a_byte_range() {
    let (_dir, backend) = backend();

    backend
        .persist("layers/deadbeef", "application/gzip", {
            Box::new(|sink| {
                use std::io::Write;
                sink.write_all(b"layer-bytes")?;
                Ok(nixery::storage::PersistOutcome {
                    digest: "sha256:deadbeef".to_string(),
                    size: 11,
                    pre_transform_digest: None,
                })
            })
        })
        .await
        .unwrap();

    let range = ByteRange { start: 6, end: Some(10) };
    match backend.serve("sha256:deadbeef", Some(range)).await.unwrap() {
        ServeResponse::Stream { mut reader, size, range } => {
            use tokio::io::AsyncReadExt;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await.unwrap();
            assert_eq!(bytes, b"bytes");
            assert_eq!(size, 5);
            let served = range.expect("range request should report a served range");
            assert_eq!((served.start, served.end, served.total), (6, 10, 11));
        }
        ServeResponse::Redirect { .. } => panic!("filesystem backend should stream, not redirect"),
    }
}

#[tokio::test]
async fn filesystem_backend_reports_missing_blob_distinctly() {
    let (_dir, backend) = backend();
    let missing_digest = format!("sha256:{}", "0".repeat(64));
    assert!(backend.serve(&missing_digest, None).await.is_err());
}

#[tokio::test]
async fn fetch_on_never_persisted_path_is_a_clean_miss() {
    let (_dir, backend) = backend();
    let err = backend.fetch("builds/never-existed").await.unwrap_err();
    assert!(matches!(err, nixery::error::NixeryError::BlobNotFound(_)));
}

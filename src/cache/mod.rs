//! Two-tier build cache (spec.md §4.7): an in-process tier backed by a
//! scratch directory and small in-memory maps, fronting the storage
//! backend as tier 2.

pub mod singleflight;

pub use singleflight::SingleFlight;

use crate::error::{NixeryError, Result};
use crate::manifest::LayerDescriptor;
use crate::storage::{StorageBackend, build_path, manifest_path};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Manifest bytes are large, so tier 1 keeps only the scratch-file path in
/// memory; tier 2 is the storage backend under `manifests/<fingerprint>`.
pub struct ManifestCache {
    scratch_dir: PathBuf,
    paths: RwLock<HashMap<String, PathBuf>>,
    backend: Arc<dyn StorageBackend>,
}

impl ManifestCache {
    pub fn new(scratch_dir: PathBuf, backend: Arc<dyn StorageBackend>) -> Self {
        Self { scratch_dir, paths: RwLock::new(HashMap::new()), backend }
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        if let Some(path) = self.paths.read().await.get(fingerprint).cloned() {
            if let Ok(bytes) = tokio::fs::read(&path).await {
                return Ok(Some(bytes));
            }
        }

        match self.backend.fetch(&manifest_path(fingerprint)).await {
            Ok(mut reader) => {
                use tokio::io::AsyncReadExt;
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await?;
                self.populate_tier1(fingerprint, &bytes).await;
                Ok(Some(bytes))
            }
            Err(NixeryError::BlobNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, fingerprint: &str, bytes: &[u8]) -> Result<()> {
        let tier1 = self.populate_tier1(fingerprint, bytes);
        let tier2 = self.backend.persist(&manifest_path(fingerprint), "application/json", {
            let bytes = bytes.to_vec();
            Box::new(move |sink| {
                use std::io::Write;
                sink.write_all(&bytes)?;
                let digest = crate::digest::docker_digest(&bytes);
                Ok(crate::storage::PersistOutcome { digest, size: bytes.len() as u64, pre_transform_digest: None })
            })
        });

        let (_, tier2_result) = tokio::join!(tier1, tier2);
        tier2_result?;
        Ok(())
    }

    async fn populate_tier1(&self, fingerprint: &str, bytes: &[u8]) {
        let path = self.scratch_dir.join(fingerprint);
        if tokio::fs::write(&path, bytes).await.is_ok() {
            self.paths.write().await.insert(fingerprint.to_string(), path);
        }
    }
}

/// Layer descriptors are small JSON, so tier 1 keeps the value itself.
pub struct LayerCache {
    entries: RwLock<HashMap<String, LayerDescriptor>>,
    backend: Arc<dyn StorageBackend>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializableDescriptor {
    digest: String,
    size: u64,
    diff_id: String,
    merge_rating: u64,
}

impl From<&LayerDescriptor> for SerializableDescriptor {
    fn from(d: &LayerDescriptor) -> Self {
        Self { digest: d.digest.clone(), size: d.size, diff_id: d.diff_id.clone(), merge_rating: d.merge_rating }
    }
}

impl From<SerializableDescriptor> for LayerDescriptor {
    fn from(d: SerializableDescriptor) -> Self {
        Self { digest: d.digest, size: d.size, diff_id: d.diff_id, merge_rating: d.merge_rating }
    }
}

impl LayerCache {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), backend }
    }

    pub async fn get(&self, layer_key: &str) -> Result<Option<LayerDescriptor>> {
        if let Some(descriptor) = self.entries.read().await.get(layer_key) {
            return Ok(Some(clone_descriptor(descriptor)));
        }

        match self.backend.fetch(&build_path(layer_key)).await {
            Ok(mut reader) => {
                use tokio::io::AsyncReadExt;
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await?;
                let serializable: SerializableDescriptor = serde_json::from_slice(&bytes)?;
                let descriptor: LayerDescriptor = serializable.into();
                self.entries.write().await.insert(layer_key.to_string(), clone_descriptor(&descriptor));
                Ok(Some(descriptor))
            }
            Err(NixeryError::BlobNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, layer_key: &str, descriptor: LayerDescriptor) -> Result<()> {
        let serializable = SerializableDescriptor::from(&descriptor);
        let bytes = serde_json::to_vec(&serializable)?;

        let tier2 = self.backend.persist(&build_path(layer_key), "application/json", {
            let bytes = bytes.clone();
            Box::new(move |sink| {
                use std::io::Write;
                sink.write_all(&bytes)?;
                let digest = crate::digest::docker_digest(&bytes);
                Ok(crate::storage::PersistOutcome { digest, size: bytes.len() as u64, pre_transform_digest: None })
            })
        });

        self.entries.write().await.insert(layer_key.to_string(), clone_descriptor(&descriptor));
        tier2.await?;
        Ok(())
    }
}

fn clone_descriptor(d: &LayerDescriptor) -> LayerDescriptor {
    LayerDescriptor { digest: d.digest.clone(), size: d.size, diff_id: d.diff_id.clone(), merge_rating: d.merge_rating }
}

/// Bounded ring of recent build errors for the index page (spec.md §4.7).
/// Re-adding a key that's already present is a no-op; when full, the
/// oldest entry is evicted to make room.
pub struct ErrorRing {
    capacity: usize,
    entries: RwLock<VecDeque<(String, String)>>,
}

impl ErrorRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: RwLock::new(VecDeque::with_capacity(capacity)) }
    }

    pub async fn record(&self, key: &str, message: &str) {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|(k, _)| k == key) {
            return;
        }
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back((key.to_string(), message.to_string()));
    }

    pub async fn recent(&self) -> Vec<(String, String)> {
        self.entries.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_ring_deduplicates_and_evicts() {
        let ring = ErrorRing::new(2);
        ring.record("a", "first").await;
        ring.record("a", "second").await;
        ring.record("b", "third").await;
        ring.record("c", "fourth").await;

        let recent = ring.recent().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].0, "b");
        assert_eq!(recent[1].0, "c");
    }
}

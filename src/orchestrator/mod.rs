//! End-to-end image build pipeline (spec.md §4.2).
//!
//! `Orchestrator::build` is the one place that wires the resolver, grouper,
//! packer, storage backend and cache together. Everything else in the
//! crate is a pure function or a narrow adapter; this is where they meet.

use crate::cache::{ErrorRing, LayerCache, ManifestCache, SingleFlight};
use crate::digest::sha256_hex;
use crate::error::{NixeryError, Result};
use crate::grouper::{self, Layer, PopularityMap};
use crate::manifest::{self, LayerDescriptor};
use crate::name::ImageRequest;
use crate::resolver::{ResolveOutcome, ResolverAdapter};
use crate::source::PackageSource;
use crate::storage::{StorageBackend, layer_path, staging_path};
use crate::tar;
use std::sync::Arc;
use tracing::{info, instrument};

/// Layers in a Docker image are capped at 125 by most runtimes; two slots
/// are always reserved for the symlink layer and the image config.
pub const LAYER_BUDGET: usize = 94;

/// Layers pack and upload concurrently, bounded to avoid opening too many
/// file handles and backend connections at once for large images.
const LAYER_PACK_CONCURRENCY: usize = 8;

pub struct Orchestrator {
    resolver: Arc<dyn ResolverAdapter>,
    storage: Arc<dyn StorageBackend>,
    popularity: Arc<dyn PopularityMap>,
    manifest_cache: ManifestCache,
    layer_cache: LayerCache,
    single_flight: SingleFlight,
    pub error_ring: ErrorRing,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn ResolverAdapter>,
        storage: Arc<dyn StorageBackend>,
        popularity: Arc<dyn PopularityMap>,
        scratch_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            manifest_cache: ManifestCache::new(scratch_dir, storage.clone()),
            layer_cache: LayerCache::new(storage.clone()),
            resolver,
            storage,
            popularity,
            single_flight: SingleFlight::new(),
            error_ring: ErrorRing::new(15),
        }
    }

    #[instrument(skip(self, request), fields(canonical_name = %request.canonical_name, tag = %request.tag))]
    pub async fn build(&self, request: &ImageRequest, source: &PackageSource) -> Result<Vec<u8>> {
        let fingerprint = cache_fingerprint(source, request);
        let build_key = fingerprint
            .clone()
            .unwrap_or_else(|| format!("{}:{}:{}", request.canonical_name, request.tag, request.arch.as_str()));

        if let Some(fp) = &fingerprint {
            if let Some(cached) = self.manifest_cache.get(fp).await? {
                info!(fingerprint = %fp, "manifest cache hit");
                return Ok(cached);
            }
        }

        let result = self
            .single_flight
            .run(&build_key, || async { self.build_uncached(request, source, &fingerprint).await })
            .await;

        if let Err(e) = &result {
            self.error_ring.record(&build_key, &e.to_string()).await;
        }

        result
    }

    async fn build_uncached(
        &self,
        request: &ImageRequest,
        source: &PackageSource,
        fingerprint: &Option<String>,
    ) -> Result<Vec<u8>> {
        // Double-check: another follower of the single-flight lock may
        // have just populated the cache while we waited for it.
        if let Some(fp) = fingerprint {
            if let Some(cached) = self.manifest_cache.get(fp).await? {
                return Ok(cached);
            }
        }

        let outcome = self
            .resolver
            .resolve(&request.packages, source, request.arch.system_tuple())
            .await?;

        let (graph, symlink_layer) = match outcome {
            ResolveOutcome::NotFound { pkgs } => return Err(NixeryError::ResolverNotFound { pkgs }),
            ResolveOutcome::Success { graph, symlink_layer } => (graph, symlink_layer),
        };

        let layers = grouper::group(&graph, self.popularity.as_ref(), LAYER_BUDGET.saturating_sub(2));
        let descriptors = self.materialize_layers(layers).await?;

        let symlink_descriptor = self.materialize_symlink_layer(&symlink_layer).await?;

        let mut all_descriptors = descriptors;
        all_descriptors.push(symlink_descriptor);

        let built = manifest::build(request.arch.as_str(), all_descriptors)?;

        self.persist_config(&built.config).await?;

        if let Some(fp) = fingerprint {
            self.manifest_cache.put(fp, &built.bytes).await?;
        }

        Ok(built.bytes)
    }

    /// Pack and upload every layer, at most [`LAYER_PACK_CONCURRENCY`]
    /// running at once (spec.md §5).
    async fn materialize_layers(&self, layers: Vec<Layer>) -> Result<Vec<LayerDescriptor>> {
        crate::concurrency::map_bounded(layers, LAYER_PACK_CONCURRENCY, |layer| {
            self.materialize_layer(layer)
        })
        .await
        .into_iter()
        .collect()
    }

    async fn materialize_layer(&self, layer: Layer) -> Result<LayerDescriptor> {
        let key = layer.identity_key();

        if let Some(cached) = self.layer_cache.get(&key).await? {
            return Ok(cached);
        }

        let descriptor = self
            .single_flight
            .run(&format!("layer:{key}"), || async {
                if let Some(cached) = self.layer_cache.get(&key).await? {
                    return Ok(cached);
                }

                let paths = layer.paths.clone();
                let staging = staging_path(&key);
                let outcome = self
                    .storage
                    .persist(&staging, "application/gzip", {
                        Box::new(move |sink| {
                            let packed = tar::pack_layer(&paths, sink)?;
                            Ok(crate::storage::PersistOutcome {
                                digest: packed.digest,
                                size: packed.compressed_size,
                                pre_transform_digest: Some(packed.diff_id),
                            })
                        })
                    })
                    .await?;

                let descriptor = self.finalize_layer(&staging, &outcome, &layer).await?;

                self.layer_cache.put(&key, clone_descriptor(&descriptor)).await?;
                Ok(descriptor)
            })
            .await?;

        Ok(descriptor)
    }

    /// Renames the staged blob into its final content-addressed location
    /// and builds the descriptor the manifest builder expects.
    async fn finalize_layer(
        &self,
        staging: &str,
        outcome: &crate::storage::PersistOutcome,
        layer: &Layer,
    ) -> Result<LayerDescriptor> {
        let hex = crate::digest::hex_part(&outcome.digest)
            .ok_or_else(|| NixeryError::packing("packer returned a malformed digest"))?;
        self.storage.rename(staging, &layer_path(hex)).await?;

        let diff_id = outcome
            .pre_transform_digest
            .clone()
            .ok_or_else(|| NixeryError::packing("packer did not report an uncompressed digest"))?;

        Ok(LayerDescriptor {
            digest: outcome.digest.clone(),
            size: outcome.size,
            diff_id,
            merge_rating: layer.merge_rating,
        })
    }

    async fn materialize_symlink_layer(
        &self,
        symlink_layer: &crate::resolver::SymlinkLayerDescriptor,
    ) -> Result<LayerDescriptor> {
        let key = format!("symlink:{}", symlink_layer.tar_hash);

        if let Some(cached) = self.layer_cache.get(&key).await? {
            return Ok(cached);
        }

        let staging = staging_path(&key);
        let path = symlink_layer.path.clone();
        let outcome = self
            .storage
            .persist(&staging, "application/gzip", {
                Box::new(move |sink| {
                    let packed = tar::compress_prebuilt_tar(&path, sink)?;
                    Ok(crate::storage::PersistOutcome {
                        digest: packed.digest,
                        size: packed.compressed_size,
                        pre_transform_digest: Some(packed.diff_id),
                    })
                })
            })
            .await?;

        let hex = crate::digest::hex_part(&outcome.digest)
            .ok_or_else(|| NixeryError::packing("packer returned a malformed digest"))?;
        self.storage.rename(&staging, &layer_path(hex)).await?;

        let diff_id = outcome
            .pre_transform_digest
            .ok_or_else(|| NixeryError::packing("packer did not report an uncompressed digest"))?;

        let descriptor = LayerDescriptor {
            digest: outcome.digest.clone(),
            size: outcome.size,
            diff_id,
            merge_rating: symlink_layer.size,
        };

        self.layer_cache.put(&key, clone_descriptor(&descriptor)).await?;
        Ok(descriptor)
    }

    async fn persist_config(&self, config: &manifest::BuiltConfig) -> Result<()> {
        let hex = sha256_hex(&config.bytes);
        let path = layer_path(&hex);
        let bytes = config.bytes.clone();

        self.storage
            .persist(&path, "application/json", {
                Box::new(move |sink| {
                    use std::io::Write;
                    sink.write_all(&bytes)?;
                    Ok(crate::storage::PersistOutcome {
                        digest: format!("sha256:{hex}"),
                        size: bytes.len() as u64,
                        pre_transform_digest: None,
                    })
                })
            })
            .await?;
        Ok(())
    }
}

fn clone_descriptor(d: &LayerDescriptor) -> LayerDescriptor {
    LayerDescriptor { digest: d.digest.clone(), size: d.size, diff_id: d.diff_id.clone(), merge_rating: d.merge_rating }
}

/// `None` means "do not cache": either the source isn't content-stable or
/// the request carries no tag worth keying on.
fn cache_fingerprint(source: &PackageSource, request: &ImageRequest) -> Option<String> {
    let source_component = source.cache_fingerprint_component()?;
    let joined = format!("{source_component}|{}|{}|{}", request.canonical_name, request.tag, request.arch.as_str());
    Some(sha256_hex(joined.as_bytes()))
}

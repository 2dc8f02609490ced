//! OCI/Docker manifest + image config builder (spec.md §4.5).

use crate::digest::sha256_hex;
use crate::error::Result;
use serde::{Deserialize, Serialize};

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// A fully-uploaded layer, ready to be listed in a manifest.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    /// `sha256:<hex>` of the compressed tar, as served from storage.
    pub digest: String,
    pub size: u64,
    /// `sha256:<hex>` of the uncompressed tar, carried into `diff_ids`.
    pub diff_id: String,
    pub merge_rating: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestLayerEntry {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestConfigEntry {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: ManifestConfigEntry,
    pub layers: Vec<ManifestLayerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,
    pub rootfs: RootFs,
    /// Required by some consumers to deserialise; always an empty object.
    pub config: serde_json::Value,
}

pub struct BuiltConfig {
    pub bytes: Vec<u8>,
    pub digest: String,
    pub size: u64,
}

pub struct BuiltManifest {
    pub bytes: Vec<u8>,
    pub config: BuiltConfig,
}

/// Build the image config and manifest from an unordered set of layer
/// descriptors. Descriptors are sorted by merge rating descending before
/// being placed in the manifest (spec.md §4.5 step 1).
pub fn build(architecture: &str, mut layers: Vec<LayerDescriptor>) -> Result<BuiltManifest> {
    layers.sort_by(|a, b| b.merge_rating.cmp(&a.merge_rating));

    let diff_ids: Vec<String> = layers.iter().map(|l| l.diff_id.clone()).collect();

    let config = ImageConfig {
        architecture: architecture.to_string(),
        os: "linux".to_string(),
        rootfs: RootFs { fs_type: "layers".to_string(), diff_ids },
        config: serde_json::json!({}),
    };

    let config_bytes = serde_json::to_vec(&config)?;
    let config_digest = format!("sha256:{}", sha256_hex(&config_bytes));
    let config_size = config_bytes.len() as u64;

    let manifest = Manifest {
        schema_version: 2,
        media_type: MANIFEST_MEDIA_TYPE.to_string(),
        config: ManifestConfigEntry {
            media_type: CONFIG_MEDIA_TYPE.to_string(),
            size: config_size,
            digest: config_digest.clone(),
        },
        layers: layers
            .into_iter()
            .map(|l| ManifestLayerEntry {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                size: l.size,
                digest: l.digest,
            })
            .collect(),
    };

    let manifest_bytes = serde_json::to_vec(&manifest)?;

    Ok(BuiltManifest {
        bytes: manifest_bytes,
        config: BuiltConfig { bytes: config_bytes, digest: config_digest, size: config_size },
    })
}

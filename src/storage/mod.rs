//! Pluggable content store (spec.md §4.4).
//!
//! `persist` is the load-bearing operation: the caller supplies a closure
//! that writes bytes into a sink and returns whatever digest/size it
//! computed while writing, so hashing and uploading always happen in the
//! same pass (spec.md §9 "streaming vs. buffering").

pub mod filesystem;
pub mod object_store;

use crate::error::Result;
use async_trait::async_trait;
use std::io::Write;
use tokio::io::AsyncRead;

pub use filesystem::FilesystemBackend;
pub use object_store::ObjectStoreBackend;

/// What a `persist` writer callback must report back once it has finished
/// writing into the sink it was handed.
pub struct PersistOutcome {
    pub digest: String,
    pub size: u64,
    /// Digest of the bytes as originally produced, before whatever
    /// transform the writer applied on the way to `sink` (e.g. the
    /// uncompressed digest of a gzip layer). `None` when the writer wrote
    /// exactly the bytes it hashed.
    pub pre_transform_digest: Option<String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a sink at `path`, call `writer` with it, and make the written
    /// bytes durable on success. `writer` computes and returns its own
    /// digest/size (the tar packer hashes as it writes).
    async fn persist(
        &self,
        path: &str,
        content_type: &str,
        writer: Box<dyn FnOnce(&mut dyn Write) -> Result<PersistOutcome> + Send>,
    ) -> Result<PersistOutcome>;

    /// Open a reader for previously persisted content at `path`. Returns a
    /// distinguishable not-found error when nothing was ever persisted
    /// there, so callers can treat it as a clean cache miss.
    async fn fetch(&self, path: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Atomically rename `old` to `new` within the store.
    async fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Resolve a digest to something an HTTP handler can serve: either the
    /// bytes themselves (filesystem) or a redirect target (object store).
    /// `range`, if present, asks for a byte-range slice rather than the
    /// whole blob (spec.md §4.4 "supports range requests"); a backend that
    /// can't honour it is free to serve the whole blob instead.
    async fn serve(&self, digest: &str, range: Option<ByteRange>) -> Result<ServeResponse>;
}

pub enum ServeResponse {
    Stream { reader: Box<dyn AsyncRead + Send + Unpin>, size: u64, range: Option<ServedRange> },
    Redirect { url: String },
}

/// A parsed single-range `Range: bytes=<start>-<end>` request.
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end byte; `None` means "through end of file".
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a `Range` header value. Only the single-range form is
    /// supported; multi-range (`bytes=0-1,2-3`) and suffix (`bytes=-500`)
    /// requests return `None`, which callers treat as "serve it all".
    pub fn parse(header_value: &str) -> Option<ByteRange> {
        let spec = header_value.strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        if start.is_empty() {
            return None;
        }
        let start: u64 = start.trim().parse().ok()?;
        let end = if end.trim().is_empty() { None } else { Some(end.trim().parse().ok()?) };
        Some(ByteRange { start, end })
    }
}

/// The range actually served, for building a `206 Partial Content` response.
#[derive(Debug, Clone, Copy)]
pub struct ServedRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

pub const LAYERS_PREFIX: &str = "layers";
pub const MANIFESTS_PREFIX: &str = "manifests";
pub const BUILDS_PREFIX: &str = "builds";
pub const STAGING_PREFIX: &str = "staging";

pub fn layer_path(digest_hex: &str) -> String {
    format!("{LAYERS_PREFIX}/{digest_hex}")
}

pub fn manifest_path(fingerprint: &str) -> String {
    format!("{MANIFESTS_PREFIX}/{fingerprint}")
}

pub fn build_path(layer_key: &str) -> String {
    format!("{BUILDS_PREFIX}/{layer_key}")
}

pub fn staging_path(temporary_key: &str) -> String {
    format!("{STAGING_PREFIX}/{temporary_key}")
}

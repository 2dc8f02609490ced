//! Filesystem storage backend (spec.md §4.4).

use super::{ByteRange, PersistOutcome, ServeResponse, ServedRange, StorageBackend};
use crate::error::{NixeryError, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn persist(
        &self,
        path: &str,
        _content_type: &str,
        writer: Box<dyn FnOnce(&mut dyn Write) -> Result<PersistOutcome> + Send>,
    ) -> Result<PersistOutcome> {
        let dest = self.resolve(path);
        let tmp = dest.with_extension("tmp-upload");

        tokio::task::spawn_blocking(move || -> Result<PersistOutcome> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&tmp)?;
            let outcome = writer(&mut file)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, &dest)?;
            Ok(outcome)
        })
        .await
        .map_err(|e| NixeryError::storage(e))?
    }

    async fn fetch(&self, path: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(NixeryError::BlobNotFound(path.to_string()));
        }
        let file = tokio::fs::File::open(&full).await?;
        Ok(Box::new(file))
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_path = self.resolve(old);
        let new_path = self.resolve(new);
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Idempotent: if the destination already exists with the same
        // content-addressed name, another builder already won the race.
        if new_path.exists() {
            let _ = tokio::fs::remove_file(&old_path).await;
            return Ok(());
        }
        tokio::fs::rename(&old_path, &new_path).await?;
        Ok(())
    }

    async fn serve(&self, digest: &str, range: Option<ByteRange>) -> Result<ServeResponse> {
        let hex = crate::digest::hex_part(digest)
            .ok_or_else(|| NixeryError::InvalidName(digest.to_string()))?;
        let path = super::layer_path(hex);
        let full = self.resolve(&path);
        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|_| NixeryError::BlobNotFound(digest.to_string()))?;
        let total = metadata.len();
        let mut file = tokio::fs::File::open(&full).await?;

        // A requested start past the end of the file is out of range; fall
        // back to serving the whole blob rather than inventing a 416 error
        // path for a single-consumer registry backend.
        let served_range = range.filter(|r| r.start < total).map(|r| {
            let end = r.end.map(|e| e.min(total - 1)).unwrap_or(total - 1);
            ServedRange { start: r.start, end, total }
        });

        match served_range {
            Some(r) => {
                file.seek(std::io::SeekFrom::Start(r.start)).await?;
                let size = r.end - r.start + 1;
                let reader = file.take(size);
                Ok(ServeResponse::Stream { reader: Box::new(reader), size, range: Some(r) })
            }
            None => Ok(ServeResponse::Stream { reader: Box::new(file), size: total, range: None }),
        }
    }
}

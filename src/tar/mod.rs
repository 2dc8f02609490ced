//! Deterministic tar packer (spec.md §4.3).
//!
//! Builds a gzip-compressed tar stream from a set of Nix store paths while
//! hashing the uncompressed and compressed bytes in a single pass. Nothing
//! here buffers a whole layer in memory: every byte that leaves the tar
//! builder is hashed and forwarded immediately.

use crate::digest::RunningDigest;
use crate::error::{NixeryError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};

/// A fixed point in time used for every entry's mtime, so that packing the
/// same store paths twice produces byte-identical tars.
const NORMALIZED_MTIME: u64 = 0;

pub struct PackedLayer {
    /// `sha256:<hex>` of the uncompressed tar bytes — becomes a `diff_id`.
    pub diff_id: String,
    /// `sha256:<hex>` of the compressed bytes as written to the sink.
    pub digest: String,
    /// Size in bytes of the compressed stream.
    pub compressed_size: u64,
}

/// Forwards every write to `inner` after feeding it through a running
/// SHA256 hash, so a layer can be hashed and written out in one pass.
struct HashingWriter<W: Write> {
    inner: W,
    digest: RunningDigest,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, digest: RunningDigest::new() }
    }

    fn finish(self) -> (String, u64, W) {
        let (hex, len) = self.digest.finish();
        (hex, len, self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Pack `store_paths` into a deterministic gzip tar, writing compressed
/// bytes to `sink` as they're produced. `store_paths` need not be sorted;
/// the packer sorts them (and the store prefix entries) itself.
pub fn pack_layer(store_paths: &[String], sink: &mut dyn Write) -> Result<PackedLayer> {
    let compressed_hasher = HashingWriter::new(sink);
    let gz = GzEncoder::new(compressed_hasher, Compression::default());
    let uncompressed_hasher = HashingWriter::new(gz);
    let mut builder = Builder::new(uncompressed_hasher);

    let mut sorted_paths: Vec<&str> = store_paths.iter().map(String::as_str).collect();
    sorted_paths.sort_unstable();

    for dir in store_prefix_dirs() {
        append_directory(&mut builder, &dir)?;
    }

    for store_path in sorted_paths {
        append_store_path(&mut builder, Path::new(store_path))?;
    }

    let uncompressed_hasher = builder.into_inner().map_err(|e| NixeryError::packing(e))?;
    let (diff_id, _uncompressed_len, gz) = uncompressed_hasher.finish();
    let compressed_hasher = gz.finish().map_err(|e| NixeryError::packing(e))?;
    let (digest, compressed_size, _sink) = compressed_hasher.finish();

    Ok(PackedLayer { diff_id, digest, compressed_size })
}

/// Gzip-compress a pre-built tar file (the resolver's symlink layer,
/// spec.md §4.2 step 5) while hashing both ends, without re-walking or
/// re-ordering its entries.
pub fn compress_prebuilt_tar(tar_path: &Path, sink: &mut dyn Write) -> Result<PackedLayer> {
    let compressed_hasher = HashingWriter::new(sink);
    let mut gz = GzEncoder::new(compressed_hasher, Compression::default());
    let mut uncompressed_digest = RunningDigest::new();

    let mut file = fs::File::open(tar_path)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        uncompressed_digest.update(&buf[..n]);
        gz.write_all(&buf[..n]).map_err(|e| NixeryError::packing(e))?;
    }

    let compressed_hasher = gz.finish().map_err(|e| NixeryError::packing(e))?;
    let (digest, compressed_size, _sink) = compressed_hasher.finish();
    let (diff_id, _len) = uncompressed_digest.finish();

    Ok(PackedLayer { diff_id, digest, compressed_size })
}

/// Conventional directory entries prepended to every layer so receiving
/// filesystems can resolve the symlink farm into the store prefix.
fn store_prefix_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("nix"), PathBuf::from("nix/store")]
}

fn append_directory<W: Write>(builder: &mut Builder<W>, path: &Path) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(0o755);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(NORMALIZED_MTIME);
    header.set_size(0);
    header.set_cksum();
    builder
        .append_data(&mut header, path, std::io::empty())
        .map_err(|e| NixeryError::packing(e))?;
    Ok(())
}

/// Walk a single store path (a directory tree, or occasionally a bare
/// file) and append every entry beneath it, sorted by name.
fn append_store_path<W: Write>(builder: &mut Builder<W>, store_path: &Path) -> Result<()> {
    let root_relative = store_path
        .strip_prefix("/")
        .unwrap_or(store_path)
        .to_path_buf();

    let mut entries: Vec<(PathBuf, PathBuf)> = Vec::new();
    collect_entries(store_path, &root_relative, &mut entries)?;
    entries.sort_by(|a, b| a.1.cmp(&b.1));

    for (abs_path, archive_path) in entries {
        append_entry(builder, &abs_path, &archive_path)?;
    }

    Ok(())
}

fn collect_entries(
    abs_path: &Path,
    archive_path: &Path,
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    let metadata = fs::symlink_metadata(abs_path)?;
    out.push((abs_path.to_path_buf(), archive_path.to_path_buf()));

    if metadata.is_dir() {
        let mut children: Vec<_> = fs::read_dir(abs_path)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            let child_abs = child.path();
            let child_archive = archive_path.join(child.file_name());
            collect_entries(&child_abs, &child_archive, out)?;
        }
    }

    Ok(())
}

fn append_entry<W: Write>(builder: &mut Builder<W>, abs_path: &Path, archive_path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(abs_path)?;
    let file_type = metadata.file_type();

    let mut header = Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(NORMALIZED_MTIME);

    if file_type.is_symlink() {
        let target = fs::read_link(abs_path)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, archive_path, &target)
            .map_err(|e| NixeryError::packing(e))?;
    } else if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_data(&mut header, archive_path, std::io::empty())
            .map_err(|e| NixeryError::packing(e))?;
    } else if file_type.is_file() {
        // Hard links are dereferenced: the regular file's content is
        // written out fully at every path that references it.
        let mode = metadata.mode() & 0o777;
        header.set_entry_type(EntryType::Regular);
        header.set_mode(if mode == 0 { 0o644 } else { mode });
        header.set_size(metadata.len());
        header.set_cksum();
        let file = fs::File::open(abs_path)?;
        builder
            .append_data(&mut header, archive_path, file)
            .map_err(|e| NixeryError::packing(e))?;
    }
    // Other inode types (sockets, fifos, devices) are skipped.

    Ok(())
}

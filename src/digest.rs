//! SHA256 digest utilities shared by the tar packer, manifest builder, and
//! storage backend.
//!
//! Every digest Nixery hands to a client is computed here so the two
//! formats in play — bare hex and the `sha256:<hex>` form used on the wire —
//! never drift out of sync.

use sha2::{Digest, Sha256};

/// The digest of an empty byte stream, i.e. `sha256("")`.
pub const EMPTY_SHA256_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Compute the SHA256 digest of a byte slice, returned as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA256 digest of a byte slice in `sha256:<hex>` form.
pub fn docker_digest(data: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(data))
}

/// A running SHA256 hash that can be fed incrementally, used by the tar
/// packer to hash uncompressed and compressed bytes as they are written
/// rather than after the fact.
#[derive(Default)]
pub struct RunningDigest {
    hasher: Sha256,
    len: u64,
}

impl RunningDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.len += bytes.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Consume the digest, returning the `sha256:<hex>` form and the number
    /// of bytes that were hashed.
    pub fn finish(self) -> (String, u64) {
        let hex = hex::encode(self.hasher.finalize());
        (format!("sha256:{}", hex), self.len)
    }
}

/// Validate a bare 64-character lowercase hex SHA256 string.
pub fn is_valid_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Validate a full `sha256:<hex>` digest.
pub fn is_valid_docker_digest(digest: &str) -> bool {
    digest
        .strip_prefix("sha256:")
        .is_some_and(is_valid_sha256_hex)
}

/// Extract the hex portion of a `sha256:<hex>` digest.
pub fn hex_part(digest: &str) -> Option<&str> {
    digest.strip_prefix("sha256:").filter(|h| is_valid_sha256_hex(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_sha256_matches_known_vector() {
        let digest = sha256_hex(b"hello world");
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn docker_digest_adds_prefix() {
        assert_eq!(
            docker_digest(b"hello world"),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_digest_matches_constant() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256_HEX);
    }

    #[test]
    fn validates_digest_format() {
        assert!(is_valid_docker_digest(
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
        assert!(!is_valid_docker_digest("sha256:invalid"));
        assert!(!is_valid_docker_digest(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
    }

    #[test]
    fn running_digest_matches_one_shot() {
        let mut running = RunningDigest::new();
        running.update(b"hello ");
        running.update(b"world");
        let (digest, len) = running.finish();
        assert_eq!(digest, docker_digest(b"hello world"));
        assert_eq!(len, 11);
    }
}

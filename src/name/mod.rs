//! Image name parsing (spec.md §3 "Image request", §4.1, §8 property 1).
//!
//! A pulled name is the slash-joined path component of the registry request,
//! e.g. `shell/git/htop`. Parsing never fails on well-formed input: any
//! non-empty, slash-separated set of segments is a valid package list. The
//! frontend is responsible for rejecting names that don't even match the
//! `[\w\-._/]+` grammar before we get here.

use crate::error::{NixeryError, Result};

/// Packages baked into every image regardless of what was requested:
/// `cacert` for TLS roots, `iana-etc` for `/etc/services` and friends.
const BASELINE_PACKAGES: &[&str] = &["cacert", "iana-etc"];

/// The fixed package set `shell` expands to.
const SHELL_PACKAGES: &[&str] = &["bashInteractive", "coreutils", "moreutils", "nano"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// The system tuple passed to the resolver subprocess (§6).
    pub fn system_tuple(self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64-linux",
            Arch::Arm64 => "aarch64-linux",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Sorted, deduplicated, expanded package list (includes baseline
    /// packages and the `shell` expansion, if requested).
    pub packages: Vec<String>,
    pub tag: String,
    pub arch: Arch,
    /// The sorted, un-expanded path segments, used as the cache key input
    /// (spec.md §3: "The canonical name used for caching joins the sorted,
    /// un-expanded packages with `/`").
    pub canonical_name: String,
}

/// Parse the `{name}` path component of a manifest request, e.g.
/// `shell/git/htop` or `arm64/hello`.
pub fn parse(name: &str, tag: &str) -> Result<ImageRequest> {
    let mut segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(NixeryError::InvalidName(name.to_string()));
    }

    let arch = if segments[0] == "arm64" {
        segments.remove(0);
        Arch::Arm64
    } else {
        Arch::Amd64
    };

    if segments.is_empty() {
        return Err(NixeryError::InvalidName(name.to_string()));
    }

    // Canonical name is computed from the raw, un-expanded segments that
    // remain after stripping the arch prefix — "shell" itself counts as a
    // package token here, expansion happens only in `packages` below.
    let mut canonical_segments: Vec<&str> = segments.clone();
    canonical_segments.sort_unstable();
    let canonical_name = canonical_segments.join("/");

    // Convenience expansion applies only to the first non-arch segment.
    let mut packages: Vec<String> = if segments[0] == "shell" {
        SHELL_PACKAGES
            .iter()
            .chain(segments[1..].iter())
            .map(|s| s.to_string())
            .collect()
    } else {
        segments.iter().map(|s| s.to_string()).collect()
    };

    packages.extend(BASELINE_PACKAGES.iter().map(|s| s.to_string()));
    packages.sort_unstable();
    packages.dedup();

    Ok(ImageRequest {
        packages,
        tag: tag.to_string(),
        arch,
        canonical_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_expansion_literal() {
        let req = parse("shell/git/htop", "latest").unwrap();
        assert_eq!(req.arch, Arch::Amd64);
        assert_eq!(
            req.packages,
            vec![
                "bashInteractive",
                "cacert",
                "coreutils",
                "git",
                "htop",
                "iana-etc",
                "moreutils",
                "nano",
            ]
        );
    }

    #[test]
    fn arm64_override_literal() {
        let req = parse("arm64/hello", "latest").unwrap();
        assert_eq!(req.arch, Arch::Arm64);
        assert_eq!(req.packages, vec!["cacert", "hello", "iana-etc"]);
    }

    #[test]
    fn shell_only_scenario_s2() {
        let req = parse("shell/htop", "latest").unwrap();
        assert_eq!(
            req.packages,
            vec!["bashInteractive", "cacert", "coreutils", "htop", "iana-etc", "moreutils", "nano"]
        );
    }

    #[test]
    fn expansion_applies_only_to_first_segment() {
        // "shell" appearing later in the path is just a package name.
        let req = parse("htop/shell", "latest").unwrap();
        assert_eq!(req.packages, vec!["cacert", "htop", "iana-etc", "shell"]);
    }

    #[test]
    fn canonical_name_uses_sorted_unexpanded_segments() {
        let req = parse("shell/git/htop", "latest").unwrap();
        assert_eq!(req.canonical_name, "git/htop/shell");
    }

    #[test]
    fn packages_are_deduplicated() {
        let req = parse("git/git/htop", "latest").unwrap();
        assert_eq!(req.packages, vec!["cacert", "git", "htop", "iana-etc"]);
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(parse("", "latest").is_err());
        assert!(parse("arm64", "latest").is_err());
    }
}

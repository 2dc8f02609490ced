//! Package source descriptor (spec.md §3 "Package source").
//!
//! A source is cacheable only when it is pinned to content that cannot
//! change under us: a 40-hex commit for git, or (by the same reasoning) a
//! channel name is never cacheable because a channel is a moving pointer.
//! A plain filesystem path is local and non-reproducible across machines,
//! so it is never cacheable either.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Channel(String),
    Git { url: String, rev: String },
    Path(PathBuf),
}

impl PackageSource {
    /// The `(srcType, srcArgs)` pair passed to the resolver subprocess.
    pub fn resolver_args(&self) -> (&'static str, String) {
        match self {
            PackageSource::Channel(name) => ("channel", name.clone()),
            PackageSource::Git { url, rev } => ("git", format!("{url}/{rev}")),
            PackageSource::Path(path) => ("path", path.display().to_string()),
        }
    }

    /// The fingerprint component contributed by this source, or `None` if
    /// the source is not content-stable and must never be cached.
    pub fn cache_fingerprint_component(&self) -> Option<String> {
        match self {
            PackageSource::Channel(_) => None,
            PackageSource::Git { url, rev } => {
                is_commit_hash(rev).then(|| format!("git:{url}:{rev}"))
            }
            PackageSource::Path(_) => None,
        }
    }
}

fn is_commit_hash(rev: &str) -> bool {
    rev.len() == 40 && rev.chars().all(|c| c.is_ascii_hexdigit())
}

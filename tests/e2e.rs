//! End-to-end build pipeline scenarios (spec.md §8 S1, S3, S4, S5, S6),
//! run against a fake resolver and a real filesystem storage backend.

use async_trait::async_trait;
use nixery::error::{NixeryError, Result};
use nixery::manifest::{ImageConfig, MANIFEST_MEDIA_TYPE, Manifest};
use nixery::name;
use nixery::orchestrator::Orchestrator;
use nixery::resolver::{GraphNode, ResolveOutcome, ResolverAdapter, RuntimeGraph, SymlinkLayerDescriptor};
use nixery::source::PackageSource;
use nixery::storage::{FilesystemBackend, StorageBackend};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A resolver stand-in that counts invocations (for the single-flight
/// property, S4) and returns a fixed small closure built from real
/// directories on disk (so the tar packer has something to walk).
struct FakeResolver {
    invocations: Arc<AtomicUsize>,
    store_root: PathBuf,
    not_found: bool,
}

impl FakeResolver {
    fn new(store_root: PathBuf) -> Self {
        Self { invocations: Arc::new(AtomicUsize::new(0)), store_root, not_found: false }
    }

    fn not_found() -> Self {
        Self { not_found: true, ..Self::new(PathBuf::new()) }
    }
}

#[async_trait]
impl ResolverAdapter for FakeResolver {
    async fn resolve(
        &self,
        packages: &[String],
        _source: &PackageSource,
        _system: &str,
    ) -> Result<ResolveOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if self.not_found {
            return Ok(ResolveOutcome::NotFound { pkgs: packages.to_vec() });
        }

        // A tiny closure: one top-level "hello" package depending on one shared dep.
        let hello = self.store_root.join("aaa-hello");
        let dep = self.store_root.join("bbb-glibc");
        fs::create_dir_all(hello.join("bin")).unwrap();
        fs::write(hello.join("bin/hello"), b"#!/bin/sh\n").unwrap();
        fs::create_dir_all(dep.join("lib")).unwrap();
        fs::write(dep.join("lib/libc.so"), b"binary").unwrap();

        let graph = RuntimeGraph {
            nodes: vec![
                GraphNode { path: hello.display().to_string(), closure_size: 10, references: vec![1] },
                GraphNode { path: dep.display().to_string(), closure_size: 20, references: vec![] },
            ],
            top_level: vec![0],
        };

        let symlink_tar = self.store_root.join("symlink.tar");
        fs::write(&symlink_tar, b"fake-prebuilt-tar-bytes").unwrap();

        Ok(ResolveOutcome::Success {
            graph,
            symlink_layer: SymlinkLayerDescriptor {
                size: 5,
                tar_hash: "fixed-tar-hash".to_string(),
                path: symlink_tar,
            },
        })
    }
}

fn empty_popularity() -> HashMap<String, u64> {
    HashMap::new()
}

fn make_orchestrator(
    resolver: Arc<dyn ResolverAdapter>,
    root: &std::path::Path,
) -> (Orchestrator, Arc<FilesystemBackend>) {
    let storage = Arc::new(FilesystemBackend::new(root.join("blobs")));
    let orchestrator =
        Orchestrator::new(resolver, storage.clone(), Arc::new(empty_popularity()), root.join("scratch"));
    (orchestrator, storage)
}

/// S1: pull `hello:latest` against a small closure. Expect a manifest with
/// the grouped data layer plus the pre-built symlink layer, i.e. 2 layers.
#[tokio::test]
async fn s1_small_closure_yields_two_layers() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(FakeResolver::new(dir.path().join("store")));
    let (orchestrator, _storage) = make_orchestrator(resolver, dir.path());
    let request = name::parse("hello", "latest").unwrap();
    let source = PackageSource::Channel("nixos-unstable".to_string());

    let bytes = orchestrator.build(&request, &source).await.unwrap();
    let manifest: Manifest = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(manifest.media_type, MANIFEST_MEDIA_TYPE);
    assert_eq!(manifest.layers.len(), 2);
    for layer in &manifest.layers {
        assert!(layer.size > 0);
    }
}

/// S3: pull a nonexistent package. Expect `ResolverNotFound` to propagate.
#[tokio::test]
async fn s3_missing_package_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(FakeResolver::not_found());
    let (orchestrator, _storage) = make_orchestrator(resolver, dir.path());
    let request = name::parse("does-not-exist", "latest").unwrap();
    let source = PackageSource::Channel("nixos-unstable".to_string());

    let err = orchestrator.build(&request, &source).await.unwrap_err();
    match err {
        NixeryError::ResolverNotFound { pkgs } => {
            assert!(pkgs.iter().any(|p| p == "does-not-exist"));
        }
        other => panic!("expected ResolverNotFound, got {other:?}"),
    }
}

/// S4: two concurrent cold pulls of the same image invoke the resolver
/// exactly once and produce byte-identical manifests.
#[tokio::test]
async fn s4_concurrent_cold_pulls_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(FakeResolver::new(dir.path().join("store")));
    let invocations = resolver.invocations.clone();
    let (orchestrator, _storage) = make_orchestrator(resolver, dir.path());
    let orchestrator = Arc::new(orchestrator);

    let request = Arc::new(name::parse("hello", "latest").unwrap());
    let source = Arc::new(PackageSource::Git {
        url: "https://example.com/nixpkgs".to_string(),
        rev: "a".repeat(40),
    });

    let (a, b) = {
        let o1 = orchestrator.clone();
        let r1 = request.clone();
        let s1 = source.clone();
        let o2 = orchestrator.clone();
        let r2 = request.clone();
        let s2 = source.clone();
        tokio::join!(
            tokio::spawn(async move { o1.build(&r1, &s1).await }),
            tokio::spawn(async move { o2.build(&r2, &s2).await }),
        )
    };

    let bytes_a = a.unwrap().unwrap();
    let bytes_b = b.unwrap().unwrap();
    assert_eq!(bytes_a, bytes_b);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

/// S5: `arm64/hello` is built with the arm64 system tuple and the config
/// declares `architecture: "arm64"`.
#[tokio::test]
async fn s5_arm64_prefix_selects_arm64_system_tuple() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(FakeResolver::new(dir.path().join("store")));
    let seen_systems = Arc::new(std::sync::Mutex::new(Vec::new()));

    // Wrap the resolver to observe the `system` argument it was called with.
    struct Observing {
        inner: Arc<FakeResolver>,
        seen: Arc<std::sync::Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl ResolverAdapter for Observing {
        async fn resolve(&self, packages: &[String], source: &PackageSource, system: &str) -> Result<ResolveOutcome> {
            self.seen.lock().unwrap().push(system.to_string());
            self.inner.resolve(packages, source, system).await
        }
    }

    let observing = Arc::new(Observing { inner: resolver, seen: seen_systems.clone() });
    let (orchestrator, storage) = make_orchestrator(observing, dir.path());
    let request = name::parse("arm64/hello", "latest").unwrap();
    let source = PackageSource::Channel("nixos-unstable".to_string());

    let bytes = orchestrator.build(&request, &source).await.unwrap();
    let manifest: Manifest = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(seen_systems.lock().unwrap().as_slice(), ["aarch64-linux"]);

    let config_hex = nixery::digest::hex_part(&manifest.config.digest).unwrap();
    let mut config_reader = storage.fetch(&nixery::storage::layer_path(config_hex)).await.unwrap();
    let mut config_bytes = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut config_reader, &mut config_bytes).await.unwrap();
    let config: ImageConfig = serde_json::from_slice(&config_bytes).unwrap();
    assert_eq!(config.architecture, "arm64");
}

/// S6: after a cacheable (git commit-hash) build, a second pull with the
/// same fingerprint is a pure cache hit — the resolver is not invoked again.
#[tokio::test]
async fn s6_cacheable_source_second_pull_is_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(FakeResolver::new(dir.path().join("store")));
    let invocations = resolver.invocations.clone();
    let (orchestrator, _storage) = make_orchestrator(resolver, dir.path());

    let request = name::parse("hello", "abc").unwrap();
    let source = PackageSource::Git {
        url: "https://example.com/nixpkgs".to_string(),
        rev: "b".repeat(40),
    };

    let first = orchestrator.build(&request, &source).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let second = orchestrator.build(&request, &source).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "second pull must not re-invoke the resolver");
    assert_eq!(first, second);
}

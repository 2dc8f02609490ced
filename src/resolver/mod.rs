//! Adapter to the external `nixery-prepare-image` resolver (spec.md §4.8,
//! §6 "Resolver subprocess contract").
//!
//! The resolver is invoked once per build, with the pinned package source
//! and system already resolved by [`crate::config::Config`] and
//! [`crate::name::ImageRequest`]. It prints nothing useful to stdout —
//! instead it writes its result to a temp file and prints that file's path
//! on stdout, so the adapter's own stdout capture never has to hold an
//! unbounded amount of resolver output in memory.

mod types;

pub use types::{GraphNode, PathId, ResolveOutcome, RuntimeGraph, SymlinkLayerDescriptor};

use crate::error::{NixeryError, Result};
use crate::source::PackageSource;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use types::{RawResolverOutput, lower_graph};

#[async_trait]
pub trait ResolverAdapter: Send + Sync {
    async fn resolve(
        &self,
        packages: &[String],
        source: &PackageSource,
        system: &str,
    ) -> Result<ResolveOutcome>;
}

/// Invokes `nixery-prepare-image` as a subprocess, per the contract in
/// spec.md §6.
pub struct SubprocessResolver {
    binary: String,
    timeout: Duration,
}

impl SubprocessResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }
}

#[async_trait]
impl ResolverAdapter for SubprocessResolver {
    async fn resolve(
        &self,
        packages: &[String],
        source: &PackageSource,
        system: &str,
    ) -> Result<ResolveOutcome> {
        let (src_type, src_args) = source.resolver_args();
        let packages_json = serde_json::to_string(packages)?;

        let mut child = Command::new(&self.binary)
            .arg("--timeout")
            .arg(self.timeout.as_secs().to_string())
            .arg("--argstr")
            .arg("packages")
            .arg(&packages_json)
            .arg("--argstr")
            .arg("srcType")
            .arg(src_type)
            .arg("--argstr")
            .arg("srcArgs")
            .arg(&src_args)
            .arg("--argstr")
            .arg("system")
            .arg(system)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NixeryError::ResolverFailure(format!("failed to spawn resolver: {e}")))?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let run = async {
            let mut out = String::new();
            stdout
                .read_to_string(&mut out)
                .await
                .map_err(|e| NixeryError::ResolverFailure(e.to_string()))?;

            let mut err = String::new();
            let _ = stderr.read_to_string(&mut err).await;
            if !err.trim().is_empty() {
                warn!(resolver_stderr = %err.trim(), "resolver subprocess wrote to stderr");
            }

            let status = child
                .wait()
                .await
                .map_err(|e| NixeryError::ResolverFailure(e.to_string()))?;
            if !status.success() {
                return Err(NixeryError::ResolverFailure(format!(
                    "resolver exited with {status}"
                )));
            }

            Ok(out)
        };

        let result_path = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => return Err(NixeryError::Timeout(self.timeout)),
        };

        let result_path = result_path.trim();
        let contents = tokio::fs::read_to_string(result_path).await.map_err(|e| {
            NixeryError::ResolverFailure(format!("reading result file {result_path}: {e}"))
        })?;

        let raw: RawResolverOutput = serde_json::from_str(&contents)?;
        match raw {
            RawResolverOutput::NotFound(nf) => Ok(ResolveOutcome::NotFound { pkgs: nf.pkgs }),
            RawResolverOutput::Success(s) => Ok(ResolveOutcome::Success {
                graph: lower_graph(s.runtime_graph),
                symlink_layer: SymlinkLayerDescriptor {
                    size: s.symlink_layer.size,
                    tar_hash: s.symlink_layer.tar_hash,
                    path: s.symlink_layer.path,
                },
            }),
        }
    }
}

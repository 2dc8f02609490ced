//! Configuration loaded from the environment (spec.md §6).
//!
//! This is an external-collaborator boundary: Nixery is always started by
//! an operator who sets these variables (systemd unit, container entrypoint,
//! docker-compose). There is no config file format to parse.

use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::source::PackageSource;

#[derive(Debug, Clone)]
pub enum StorageBackendKind {
    Filesystem { path: PathBuf },
    ObjectStore { bucket: String, endpoint: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// Directory of static assets served under `/static`.
    pub web_dir: PathBuf,
    /// Which storage backend variant to construct.
    pub storage: StorageBackendKind,
    /// Default package source, selected by exactly one of the
    /// `NIXERY_CHANNEL` / `NIXERY_PKGS_REPO` / `NIXERY_PKGS_PATH` variables.
    pub source: PackageSource,
    /// Timeout applied to the resolver subprocess.
    pub resolver_timeout: Duration,
    /// URL to fetch the popularity map from at startup, if any.
    pub popularity_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .context("PORT must be set")?
            .parse()
            .context("PORT must be a valid u16")?;

        let web_dir = env::var("WEB_DIR").context("WEB_DIR must be set")?.into();

        let storage = match env::var("NIXERY_STORAGE_BACKEND")
            .context("NIXERY_STORAGE_BACKEND must be set")?
            .as_str()
        {
            "filesystem" => {
                let path = env::var("STORAGE_PATH")
                    .context("STORAGE_PATH must be set for the filesystem backend")?;
                StorageBackendKind::Filesystem { path: path.into() }
            }
            "gcs" => {
                let bucket = env::var("GCS_BUCKET").context("GCS_BUCKET must be set")?;
                let endpoint = env::var("NIXERY_STORAGE_ENDPOINT")
                    .unwrap_or_else(|_| "https://storage.googleapis.com".to_string());
                StorageBackendKind::ObjectStore { bucket, endpoint }
            }
            "s3" => {
                let bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
                let endpoint = env::var("NIXERY_STORAGE_ENDPOINT")
                    .context("NIXERY_STORAGE_ENDPOINT must be set for the s3 backend")?;
                StorageBackendKind::ObjectStore { bucket, endpoint }
            }
            other => return Err(anyhow!("unknown NIXERY_STORAGE_BACKEND: {other}")),
        };

        let source = Self::source_from_env()?;

        let resolver_timeout = Duration::from_secs(
            env::var("NIX_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        );

        let popularity_url = env::var("NIX_POPULARITY_URL").ok().filter(|v| !v.is_empty());

        Ok(Config {
            port,
            web_dir,
            storage,
            source,
            resolver_timeout,
            popularity_url,
        })
    }

    fn source_from_env() -> Result<PackageSource> {
        let channel = env::var("NIXERY_CHANNEL").ok();
        let repo = env::var("NIXERY_PKGS_REPO").ok();
        let path = env::var("NIXERY_PKGS_PATH").ok();

        match (channel, repo, path) {
            (Some(c), None, None) => Ok(PackageSource::Channel(c)),
            (None, Some(url), None) => Ok(PackageSource::Git { url, rev: "master".to_string() }),
            (None, None, Some(p)) => Ok(PackageSource::Path(p.into())),
            (None, None, None) => Err(anyhow!(
                "exactly one of NIXERY_CHANNEL, NIXERY_PKGS_REPO, NIXERY_PKGS_PATH must be set"
            )),
            _ => Err(anyhow!(
                "only one of NIXERY_CHANNEL, NIXERY_PKGS_REPO, NIXERY_PKGS_PATH may be set"
            )),
        }
    }
}

//! Nixery entry point: load configuration, wire the core pipeline together,
//! and serve the registry frontend.

use anyhow::Result;
use nixery::config::{Config, StorageBackendKind};
use nixery::frontend::{self, AppState};
use nixery::logging::Logger;
use nixery::orchestrator::Orchestrator;
use nixery::resolver::SubprocessResolver;
use nixery::storage::{FilesystemBackend, ObjectStoreBackend, StorageBackend};
use nixery::{grouper::PopularityMap, popularity};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let banner = Logger::default();
    banner.section("Nixery");
    banner.info(&format!("listening on port {}", config.port));
    banner.info(&format!("storage backend: {}", storage_name(&config.storage)));

    let storage: Arc<dyn StorageBackend> = match &config.storage {
        StorageBackendKind::Filesystem { path } => {
            tokio::fs::create_dir_all(path).await?;
            Arc::new(FilesystemBackend::new(path.clone()))
        }
        StorageBackendKind::ObjectStore { bucket, endpoint } => {
            Arc::new(ObjectStoreBackend::new(bucket.clone(), endpoint.clone()))
        }
    };

    let popularity: Arc<dyn PopularityMap> = match &config.popularity_url {
        Some(url) => {
            banner.info(&format!("fetching popularity map from {url}"));
            let map = popularity::fetch(url).await;
            banner.success(&format!("loaded popularity data for {} packages", map.len()));
            Arc::new(map)
        }
        None => {
            banner.warning("NIX_POPULARITY_URL not set, promotion-by-popularity disabled");
            Arc::new(popularity::empty() as HashMap<String, u64>)
        }
    };

    let resolver = Arc::new(SubprocessResolver::new("nixery-prepare-image", config.resolver_timeout));

    let scratch_dir = std::env::temp_dir().join("nixery-manifest-cache");
    tokio::fs::create_dir_all(&scratch_dir).await?;

    let orchestrator =
        Arc::new(Orchestrator::new(resolver, storage.clone(), popularity, scratch_dir));

    let state = AppState::new(orchestrator, storage, &config);
    let app = frontend::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    banner.success(&format!("ready at http://{addr}"));
    info!(addr, "nixery listening");

    axum::serve(listener, app).await?;
    Ok(())
}

fn storage_name(kind: &StorageBackendKind) -> &'static str {
    match kind {
        StorageBackendKind::Filesystem { .. } => "filesystem",
        StorageBackendKind::ObjectStore { .. } => "object-store",
    }
}

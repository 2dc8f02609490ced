//! Registry frontend (spec.md §4.1, §6): Docker Registry HTTP API V2
//! routes, pull-only.
//!
//! `{name}` is greedy and may contain slashes, so unlike a typical REST API
//! we can't bind it to an axum path segment — the whole `/v2/*` suffix is
//! captured as one wildcard and split on the last `/manifests/` or
//! `/blobs/` literal, the same way the upstream Go router does it.

mod index;

use crate::cache::ErrorRing;
use crate::config::Config;
use crate::error::NixeryError;
use crate::name;
use crate::orchestrator::Orchestrator;
use crate::source::PackageSource;
use crate::storage::StorageBackend;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<dyn StorageBackend>,
    pub source: PackageSource,
    pub web_dir: std::path::PathBuf,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        storage: Arc<dyn StorageBackend>,
        config: &Config,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            source: config.source.clone(),
            web_dir: config.web_dir.clone(),
        }
    }

    fn error_ring(&self) -> &ErrorRing {
        &self.orchestrator.error_ring
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v2/", get(v2_root))
        .route("/v2/{*rest}", get(v2_dispatch))
        .route("/", get(index::index))
        .route("/static/{*path}", get(index::static_asset))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn v2_root() -> StatusCode {
    StatusCode::OK
}

/// Dispatches every `/v2/...` request that isn't the bare root. Finds the
/// last `/manifests/` or `/blobs/` separator in the captured suffix; the
/// name is everything before it (any, possibly slash-containing, name is
/// legal), the reference/digest is everything after.
async fn v2_dispatch(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
        return manifest_request(&state, name, reference, &headers).await;
    }
    if let Some((name, reference)) = rest.rsplit_once("/blobs/") {
        return blob_request(&state, name, reference, &headers).await;
    }
    ApiError::not_found("UNKNOWN", "no route matched").into_response()
}

/// Parses a `Range: bytes=start-end` request header. Anything we don't
/// recognize (multi-range, suffix-range, malformed) falls back to `None`,
/// which callers treat as "serve the whole blob".
fn parse_range_header(headers: &HeaderMap) -> Option<crate::storage::ByteRange> {
    headers.get(header::RANGE)?.to_str().ok().and_then(crate::storage::ByteRange::parse)
}

async fn manifest_request(
    state: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
) -> Response {
    if !valid_name(name) {
        return ApiError::not_found("UNKNOWN", "invalid repository name").into_response();
    }

    if let Some(hex) = digest_hex(reference) {
        return serve_digest(state, &format!("sha256:{hex}"), parse_range_header(headers)).await;
    }

    if !valid_tag(reference) {
        return ApiError::not_found("UNKNOWN", "invalid tag").into_response();
    }

    build_and_serve_manifest(state, name, reference).await
}

async fn blob_request(
    state: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
) -> Response {
    if !valid_name(name) {
        return ApiError::not_found("UNKNOWN", "invalid repository name").into_response();
    }

    match digest_hex(reference) {
        Some(hex) => serve_digest(state, &format!("sha256:{hex}"), parse_range_header(headers)).await,
        None => ApiError::not_found("BLOB_UNKNOWN", "invalid digest").into_response(),
    }
}

/// Build (or cache-hit) the image, persist the manifest blob under its own
/// content address *before* writing any response bytes — clients are known
/// to immediately refetch the manifest by digest (spec.md §4.1).
async fn build_and_serve_manifest(state: &AppState, name: &str, tag: &str) -> Response {
    let request = match name::parse(name, tag) {
        Ok(r) => r,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let manifest_bytes = match state.orchestrator.build(&request, &state.source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::from(e).into_response();
        }
    };

    let digest = crate::digest::docker_digest(&manifest_bytes);
    let hex = crate::digest::hex_part(&digest).expect("docker_digest always produces valid hex");
    let path = crate::storage::layer_path(hex);

    let bytes_for_persist = manifest_bytes.clone();
    if let Err(e) = state
        .storage
        .persist(&path, crate::manifest::MANIFEST_MEDIA_TYPE, {
            Box::new(move |sink| {
                use std::io::Write;
                sink.write_all(&bytes_for_persist)?;
                Ok(crate::storage::PersistOutcome {
                    digest: digest.clone(),
                    size: bytes_for_persist.len() as u64,
                    pre_transform_digest: None,
                })
            })
        })
        .await
    {
        return ApiError::from(e).into_response();
    }

    let mut response = Response::new(axum::body::Body::from(manifest_bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(crate::manifest::MANIFEST_MEDIA_TYPE),
    );
    response
        .headers_mut()
        .insert("Docker-Content-Digest", HeaderValue::from_str(&digest).unwrap());
    response
}

/// Serve a blob or a manifest fetched by digest: stream the bytes
/// (filesystem backend) or redirect to the backend's URL (object store).
async fn serve_digest(
    state: &AppState,
    digest: &str,
    range: Option<crate::storage::ByteRange>,
) -> Response {
    match state.storage.serve(digest, range).await {
        Ok(crate::storage::ServeResponse::Stream { reader, size, range }) => {
            let stream = tokio_util::io::ReaderStream::new(reader);
            let body = axum::body::Body::from_stream(stream);
            let mut response = Response::new(body);
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from_str(&size.to_string()).unwrap());
            if let Some(r) = range {
                *response.status_mut() = StatusCode::PARTIAL_CONTENT;
                response.headers_mut().insert(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes {}-{}/{}", r.start, r.end, r.total)).unwrap(),
                );
            }
            response
        }
        Ok(crate::storage::ServeResponse::Redirect { url }) => {
            let mut response = StatusCode::SEE_OTHER.into_response();
            response
                .headers_mut()
                .insert(header::LOCATION, HeaderValue::from_str(&url).unwrap());
            response
        }
        Err(NixeryError::BlobNotFound(_)) => {
            ApiError::not_found("BLOB_UNKNOWN", "blob not found").into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// `[\w\-._/]+` without pulling in the `regex` crate for a single grammar
/// check used at just two call sites.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
}

/// `[\w\-._]+`
fn valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// `sha256:` followed by exactly 64 lowercase hex characters.
fn digest_hex(reference: &str) -> Option<&str> {
    reference.strip_prefix("sha256:").filter(|h| crate::digest::is_valid_sha256_hex(h))
}

#[derive(Debug, Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorEntry>,
}

/// V2-protocol error envelope, grounded in the pack's `ApiError` /
/// `ErrorResponse` split (status + machine code + human message).
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code, message: message.into() }
    }

    fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code, message: message.into() }
    }
}

impl From<NixeryError> for ApiError {
    fn from(err: NixeryError) -> Self {
        match err {
            NixeryError::ResolverNotFound { pkgs } => ApiError::not_found(
                "MANIFEST_UNKNOWN",
                format!("Could not find Nix packages: {pkgs:?}"),
            ),
            NixeryError::BlobNotFound(_) => ApiError::not_found("BLOB_UNKNOWN", err.to_string()),
            NixeryError::InvalidName(_) => ApiError::not_found("UNKNOWN", err.to_string()),
            other => ApiError::internal("UNKNOWN", other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope { errors: vec![ErrorEntry { code: self.code, message: self.message }] };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_grammar_accepts_slashes() {
        assert!(valid_name("shell/git/htop"));
        assert!(!valid_name(""));
        assert!(!valid_name("bad name"));
    }

    #[test]
    fn tag_grammar_rejects_slashes() {
        assert!(valid_tag("latest"));
        assert!(valid_tag("abc123"));
        assert!(!valid_tag("has/slash"));
    }

    #[test]
    fn digest_hex_requires_64_lowercase_hex() {
        let hex = "a".repeat(64);
        assert_eq!(digest_hex(&format!("sha256:{hex}")), Some(hex.as_str()));
        assert_eq!(digest_hex("sha256:tooshort"), None);
        assert_eq!(digest_hex("md5:deadbeef"), None);
    }

    #[test]
    fn manifest_error_maps_to_404_with_package_list() {
        let err = ApiError::from(NixeryError::ResolverNotFound { pkgs: vec!["does-not-exist".into()] });
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "MANIFEST_UNKNOWN");
        assert_eq!(err.message, "Could not find Nix packages: [\"does-not-exist\"]");
    }
}

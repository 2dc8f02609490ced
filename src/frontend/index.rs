//! The `/` index page and `/static/*` asset serving.
//!
//! The original home page is an embedded-at-build-time static site (an
//! external collaborator per spec.md §1); here it is just files under
//! `WEB_DIR` that an operator drops in. What *is* core is the recent-error
//! listing (spec.md §4.7's bounded error ring), so that's rendered
//! server-side rather than left to client-side JS.

use super::AppState;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let recent = state.error_ring().recent().await;

    let mut errors_html = String::new();
    if recent.is_empty() {
        errors_html.push_str("<p>No recent build errors.</p>");
    } else {
        errors_html.push_str("<ul>");
        for (key, message) in recent.iter().rev() {
            errors_html.push_str(&format!(
                "<li><code>{}</code>: {}</li>",
                html_escape(key),
                html_escape(message)
            ));
        }
        errors_html.push_str("</ul>");
    }

    Html(format!(
        concat!(
            "<!DOCTYPE html><html><head><title>Nixery</title></head><body>",
            "<h1>Nixery</h1>",
            "<p>Container images, on demand, from the Nix package set.</p>",
            "<p>Version: {version}</p>",
            "<h2>Recent build errors</h2>{errors}",
            "</body></html>",
        ),
        version = env!("CARGO_PKG_VERSION"),
        errors = errors_html,
    ))
}

/// Serves assets out of `WEB_DIR` by relative path. Traversal outside the
/// directory is rejected by refusing any `..` path component, matching the
/// grammar-guard style the registry routes use.
pub async fn static_asset(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    if path.split('/').any(|segment| segment == "..") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let full = state.web_dir.join(&path);
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let content_type = guess_content_type(&full);
            let mut response = Response::new(axum::body::Body::from(bytes));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
            response
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn guess_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

//! Popularity map loading (spec.md §3 "Popularity map", §6
//! `NIX_POPULARITY_URL`).
//!
//! Fetched once at startup over the same `reqwest` client the object-store
//! backend already depends on. An empty/absent URL disables
//! promotion-by-popularity entirely — every node then defaults to
//! popularity 1, below the grouper's promotion threshold.

use std::collections::HashMap;

/// Fetch and parse the popularity JSON (`{ "<short-name>": <count>, ... }`)
/// from `url`. Returns an empty map on any fetch/parse failure rather than
/// failing startup — promotion-by-popularity is a heuristic, not a
/// correctness requirement, and a stale or unreachable popularity service
/// shouldn't take the whole registry down.
pub async fn fetch(url: &str) -> HashMap<String, u64> {
    match fetch_inner(url).await {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(url, error = %e, "failed to fetch popularity map, continuing without it");
            HashMap::new()
        }
    }
}

async fn fetch_inner(url: &str) -> Result<HashMap<String, u64>, reqwest::Error> {
    let response = reqwest::get(url).await?.error_for_status()?;
    response.json().await
}

pub fn empty() -> HashMap<String, u64> {
    HashMap::new()
}

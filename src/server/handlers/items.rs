//! The four benchmarked item-serving strategies.
//!
//! `/items` and `/items-db-cache` go through a [`ResponseCache`]; the
//! cached payload is embedded as a pre-serialized [`RawValue`] so a hit
//! never re-encodes the items. `/items-no-cache` and `/items-db` call the
//! source on every request for the uncached baseline.
//!
//! [`ResponseCache`]: crate::cache::ResponseCache

use crate::error::Result;
use crate::metrics;
use crate::server::state::AppState;
use crate::source::Item;
use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    /// Optional category filter; only honored by `/items-db`
    category: Option<String>,
}

/// GET /items — unconditional in-memory cache
pub async fn items_cached(State(state): State<AppState>) -> Result<Response> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct CachedItems<'a> {
        source: &'static str,
        fetched_at: String,
        processing_time_ms: u64,
        items: &'a RawValue,
    }

    let start = Instant::now();

    let outcome = match state.memory_cache.get().await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_request("items", 500);
            metrics::record_duration("items", start);
            return Err(e);
        }
    };

    metrics::record_cache_lookup("items", outcome.hit);
    metrics::record_request("items", 200);
    metrics::record_duration("items", start);

    Ok(Json(CachedItems {
        source: if outcome.hit { "cache" } else { "fresh" },
        fetched_at: outcome.fetched_at.to_rfc3339(),
        processing_time_ms: start.elapsed().as_millis() as u64,
        items: &outcome.payload,
    })
    .into_response())
}

/// GET /items-no-cache — regenerate on every request (baseline)
pub async fn items_no_cache(State(state): State<AppState>) -> Result<Response> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct FreshItems {
        source: &'static str,
        processing_time_ms: u64,
        items: Vec<Item>,
    }

    let start = Instant::now();

    let generated = match state.source.generate(None).await {
        Ok(generated) => generated,
        Err(e) => {
            metrics::record_request("items-no-cache", 500);
            metrics::record_duration("items-no-cache", start);
            return Err(e);
        }
    };

    metrics::record_request("items-no-cache", 200);
    metrics::record_duration("items-no-cache", start);

    Ok(Json(FreshItems {
        source: "no-cache",
        processing_time_ms: start.elapsed().as_millis() as u64,
        items: generated.items,
    })
    .into_response())
}

/// GET /items-db-cache — TTL cache over the backing store
pub async fn items_ttl_cached(State(state): State<AppState>) -> Result<Response> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct TtlCachedItems<'a> {
        source: &'static str,
        elapsed_ms: u64,
        cache_hit: bool,
        items: &'a RawValue,
    }

    let start = Instant::now();

    let outcome = match state.ttl_cache.get().await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_request("items-db-cache", 500);
            metrics::record_duration("items-db-cache", start);
            return Err(e);
        }
    };

    metrics::record_cache_lookup("items-db-cache", outcome.hit);
    metrics::record_request("items-db-cache", 200);
    metrics::record_duration("items-db-cache", start);

    Ok(Json(TtlCachedItems {
        source: "db-cache",
        elapsed_ms: start.elapsed().as_millis() as u64,
        cache_hit: outcome.hit,
        items: &outcome.payload,
    })
    .into_response())
}

/// GET /items-db — backing store on every request, optional category filter
///
/// The filtered variant shares no cache with the other endpoints; it always
/// takes the regeneration path and exists to contrast cached vs. uncached
/// cost per request.
pub async fn items_db(
    Query(query): Query<ItemsQuery>,
    State(state): State<AppState>,
) -> Result<Response> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct DbItems {
        source: &'static str,
        elapsed_ms: u64,
        items: Vec<Item>,
    }

    let start = Instant::now();
    let category = query.category.as_deref();
    if let Some(cat) = category {
        info!("serving items filtered by category: {}", cat);
    }

    let generated = match state.source.generate(category).await {
        Ok(generated) => generated,
        Err(e) => {
            metrics::record_request("items-db", 500);
            metrics::record_duration("items-db", start);
            return Err(e);
        }
    };

    metrics::record_request("items-db", 200);
    metrics::record_duration("items-db", start);

    Ok(Json(DbItems {
        source: "db",
        elapsed_ms: start.elapsed().as_millis() as u64,
        items: generated.items,
    })
    .into_response())
}

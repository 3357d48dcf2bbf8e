use crate::server::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::info;

/// POST /cache/reset — drop both cache entries and zero all counters.
/// Always succeeds; resetting an empty cache is a no-op.
pub async fn reset_cache(State(state): State<AppState>) -> Json<Value> {
    state.memory_cache.reset();
    state.ttl_cache.reset();
    info!("caches reset via admin endpoint");

    Json(json!({ "message": "Cache reset successfully" }))
}

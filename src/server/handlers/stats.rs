use crate::server::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    request_count: u64,
    cache_hit_count: u64,
    /// Percentage string, e.g. `"66.67%"`
    cache_hit_rate: String,
    /// Remaining validity of the TTL cache entry
    cache_valid_for_ms: u64,
    memory: MemoryUsage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    rss_mb: Option<f64>,
    peak_rss_mb: Option<f64>,
}

/// GET /stats — counters across both caches plus process memory
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let memory_stats = state.memory_cache.stats();
    let ttl_stats = state.ttl_cache.stats();

    let request_count = memory_stats.requests + ttl_stats.requests;
    let cache_hit_count = memory_stats.hits + ttl_stats.hits;
    let rate = if request_count == 0 {
        0.0
    } else {
        cache_hit_count as f64 / request_count as f64
    };

    Json(StatsResponse {
        request_count,
        cache_hit_count,
        cache_hit_rate: format!("{:.2}%", rate * 100.0),
        cache_valid_for_ms: ttl_stats.valid_remaining.as_millis() as u64,
        memory: memory_usage(),
    })
}

/// GET /metrics — Prometheus text exposition
pub async fn metrics_text(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Best-effort process memory from /proc; fields are null off Linux.
fn memory_usage() -> MemoryUsage {
    #[cfg(target_os = "linux")]
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        let field_kb = |key: &str| {
            status
                .lines()
                .find(|line| line.starts_with(key))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|value| value.parse::<f64>().ok())
        };
        let to_mb = |kb: f64| (kb / 1024.0 * 100.0).round() / 100.0;
        return MemoryUsage {
            rss_mb: field_kb("VmRSS:").map(to_mb),
            peak_rss_mb: field_kb("VmHWM:").map(to_mb),
        };
    }

    MemoryUsage {
        rss_mb: None,
        peak_rss_mb: None,
    }
}

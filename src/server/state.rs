use crate::cache::ResponseCache;
use crate::config::{Config, SourceType};
use crate::error::Result;
use crate::metrics;
use crate::source::{ItemSource, SimulatedSource};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Unconditional in-memory cache backing `/items`
    pub memory_cache: ResponseCache,
    /// TTL cache backing `/items-db-cache`
    pub ttl_cache: ResponseCache,
    /// Shared source for the always-regenerate endpoints
    pub source: Arc<dyn ItemSource>,
    /// Server start time, for uptime reporting
    pub started_at: Instant,
    /// Prometheus exposition handle
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    ///
    /// Fails when the configured source backend cannot be constructed
    /// (MySQL selected without the `mysql` feature, or the pool cannot
    /// connect).
    pub async fn new(config: Config) -> Result<Self> {
        let source = build_source(&config).await?;

        let ttl = Duration::from_millis(config.cache_ttl_ms);
        let memory_cache = ResponseCache::new(source.clone(), None, config.stale_policy);
        let ttl_cache = ResponseCache::new(source.clone(), Some(ttl), config.stale_policy);

        Ok(Self {
            config: Arc::new(config),
            memory_cache,
            ttl_cache,
            source,
            started_at: Instant::now(),
            metrics: metrics::recorder_handle(),
        })
    }
}

async fn build_source(config: &Config) -> Result<Arc<dyn ItemSource>> {
    match config.source {
        SourceType::Simulated => Ok(Arc::new(SimulatedSource::new(config.item_count))),
        #[cfg(feature = "mysql")]
        SourceType::MySql => {
            let source = crate::source::DbSource::connect(&config.db).await?;
            Ok(Arc::new(source))
        }
        #[cfg(not(feature = "mysql"))]
        SourceType::MySql => Err(crate::error::CachemarkError::Config(
            "ITEM_SOURCE=mysql requires a build with the `mysql` feature".to_string(),
        )),
    }
}

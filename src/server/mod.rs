pub mod handlers;
pub mod state;

use crate::config::Config;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use tracing::{error, info};

/// Build the full router with shared state and middleware.
///
/// Split out from [`start`] so tests can drive it with
/// `tower::ServiceExt::oneshot` without binding a listener.
pub async fn build_router(config: Config) -> crate::error::Result<Router> {
    let state = AppState::new(config).await?;

    Ok(Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/items", get(handlers::items::items_cached))
        .route("/items-no-cache", get(handlers::items::items_no_cache))
        .route("/items-db-cache", get(handlers::items::items_ttl_cached))
        .route("/items-db", get(handlers::items::items_db))
        .route("/stats", get(handlers::stats::stats))
        .route("/metrics", get(handlers::stats::metrics_text))
        .route("/cache/reset", post(handlers::admin::reset_cache))
        .layer(middleware::from_fn(version_header))
        .with_state(state))
}

/// Stamp every response with the server version.
async fn version_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "x-cachemark-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let app = build_router(config).await?;

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{}", addr);
    info!("memory cache ->  GET /items");
    info!("no cache     ->  GET /items-no-cache");
    info!("TTL cache    ->  GET /items-db-cache");
    info!("direct       ->  GET /items-db");
    info!("stats        ->  GET /stats");

    // Start serving
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

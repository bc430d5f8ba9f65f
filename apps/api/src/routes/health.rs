use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub redis: &'static str,
    pub cache: Value,
}

/// GET /health
/// Always 200 while the process is up. Cache trouble only shows in the body.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let Some(cache) = state.cache.as_ref() else {
        return Json(HealthResponse {
            status: "healthy",
            redis: "disconnected",
            cache: stats_unavailable(),
        });
    };

    let redis = match cache.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!("Health check could not reach Redis: {e}");
            "disconnected"
        }
    };

    let cache_stats = if redis == "connected" {
        match cache.stats().await {
            Ok(stats) => json!(stats),
            Err(e) => {
                warn!("Could not read Redis statistics: {e}");
                stats_unavailable()
            }
        }
    } else {
        stats_unavailable()
    };

    Json(HealthResponse {
        status: "healthy",
        redis,
        cache: cache_stats,
    })
}

fn stats_unavailable() -> Value {
    json!({
        "status": "error",
        "message": "Could not retrieve Redis cache statistics"
    })
}

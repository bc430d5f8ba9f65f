pub mod health;

use axum::{
    http::{HeaderValue, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::errors::AppError;
use crate::server_config::ServerConfig;
use crate::state::AppState;

async fn not_found() -> AppError {
    AppError::NotFound("No route matches this path".to_string())
}

/// Gives framework-generated 413/408/429 responses the same JSON body as `AppError`.
async fn json_error_bodies(response: Response) -> Response {
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge.into_response(),
        StatusCode::REQUEST_TIMEOUT => AppError::RequestTimeout.into_response(),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited.into_response(),
        _ => response,
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let max_upload_size = state.config.max_upload_size;
    let cors = cors_layer(&state.config.cors_origins);

    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(server.request_timeout()))
        .layer(RequestBodyLimitLayer::new(max_upload_size))
        .layer(cors);

    if server.access_log {
        // INFO so the access log survives the levels the deploy tool exports.
        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );
    }

    router.layer(map_response(json_error_bodies))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::cache::CacheClient;
    use crate::config::Config;

    fn unreachable_cache_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "REDIS_URL" => Some("redis://127.0.0.1:1/0".to_string()),
            "MAX_UPLOAD_SIZE" => Some("64".to_string()),
            _ => None,
        })
        .unwrap();
        let cache = CacheClient::open(&config.redis_url, config.redis_max_memory.clone())
            .unwrap()
            .with_ttl(config.cache_ttl())
            .with_timeout(Duration::from_millis(300));
        AppState {
            config: Arc::new(config),
            cache: Some(cache),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_ok_when_cache_is_down() {
        let app = build_router(unreachable_cache_state(), &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["redis"], "disconnected");
        assert_eq!(body["cache"]["status"], "error");
    }

    #[tokio::test]
    async fn test_health_without_cache_client() {
        let state = AppState {
            cache: None,
            ..unreachable_cache_state()
        };
        let app = build_router(state, &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["redis"], "disconnected");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = build_router(unreachable_cache_state(), &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_oversized_body_is_json_413() {
        let app = build_router(unreachable_cache_state(), &ServerConfig::default());
        let request = Request::post("/api/upload")
            .header(header::CONTENT_LENGTH, "1024")
            .body(Body::from(vec![b'x'; 1024]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "PAYLOAD_TOO_LARGE"
        );
    }

    #[tokio::test]
    async fn test_rate_limited_is_json_429() {
        let response = json_error_bodies(StatusCode::TOO_MANY_REQUESTS.into_response()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["message"], "Rate limit exceeded");
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_access_log_is_written_at_info() {
        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let state = AppState {
            cache: None,
            ..unreachable_cache_state()
        };
        let app = build_router(state, &ServerConfig::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("started processing request"), "{log}");
        assert!(log.contains("finished processing request"), "{log}");
        assert!(log.contains("/health"), "{log}");
    }

    #[tokio::test]
    async fn test_access_log_off_writes_nothing() {
        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let state = AppState {
            cache: None,
            ..unreachable_cache_state()
        };
        let server = ServerConfig {
            access_log: false,
            ..ServerConfig::default()
        };
        let response = build_router(state, &server)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(!log.contains("processing request"), "{log}");
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        // Builds without panicking even with an unrepresentable header value.
        let _ = cors_layer(&["https://ok.example".to_string(), "bad\norigin".to_string()]);
    }
}

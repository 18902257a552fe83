//! HTTP middleware for the realtime endpoint

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use chatrelay_config::WebSocketConfig;

/// Build the CORS layer from the configured connection surface. Entries
/// that fail to parse are skipped with a warning rather than rejecting the
/// whole configuration.
pub fn cors_layer(config: &WebSocketConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|method| match method.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(method, "ignoring unparseable allowed method");
                None
            }
        })
        .collect();

    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|header| match header.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(header, "ignoring unparseable allowed header");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(config.allow_credentials)
}

/// Logging middleware for request/response logging
pub async fn logging_middleware(
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = duration.as_millis(),
        "request completed"
    );

    Ok(response)
}

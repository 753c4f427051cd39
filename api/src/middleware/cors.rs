use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Build a CORS layer from the `PARLEY_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated allowlist (default: `http://localhost:9000`,
///   the dev frontend)
/// - Methods: GET, POST, PUT, OPTIONS
/// - Headers: Content-Type, Authorization, X-Requested-With, X-Recaptcha-Token
/// - Credentials: allowed (the verification cookie must travel)
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let origins_str = std::env::var("PARLEY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:9000".to_string());

    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<HeaderValue>().ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-recaptcha-token"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

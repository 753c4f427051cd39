use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod middleware;
mod openai;
mod routes;
mod state;

/// How often elapsed rate windows are swept out of memory.
const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parley Gateway API",
        version = "0.1.0",
        description = "Human-verified relay in front of an LLM completion endpoint: \
                       CAPTCHA-gated admission, per-client rate control, and strict \
                       conversation-log normalization."
    ),
    paths(
        routes::health::health_check,
        routes::auth::verify_recaptcha,
        routes::auth::verify_status,
        routes::openai::submit_logs,
    ),
    components(schemas(
        HealthResponse,
        routes::auth::VerifyRecaptchaRequest,
        routes::auth::VerifySuccessResponse,
        routes::auth::VerifyStatusResponse,
        routes::openai::SubmitLogsResponse,
        parley_core::error::ApiError,
        parley_core::normalize::Role,
        parley_core::normalize::PartType,
        parley_core::normalize::NormalizedPart,
        parley_core::normalize::NormalizedMessage,
        parley_core::normalize::IllegalPart,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = state::AppConfig::from_env();
    if config.cookie_secret.is_none() {
        tracing::warn!("COOKIE_SECRET is not set; verified routes will refuse all requests");
    }
    let app_state = state::AppState::new(config);

    // Periodic sweep so one-off callers do not pin rate-window entries
    // forever.
    let throttle = app_state.throttle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            throttle.prune(Utc::now()).await;
        }
    });

    let cors_layer = middleware::cors::build_cors_layer();

    // The completion route sits behind gate → throttle, in that order; the
    // verification endpoints get only the stock per-IP limiter.
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::router().layer(middleware::rate_limit::verify_layer()))
        .merge(
            routes::openai::router()
                .layer(axum::middleware::from_fn_with_state(
                    app_state.clone(),
                    middleware::throttle::throttle,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    app_state.clone(),
                    middleware::gate::gate,
                )),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(
                    middleware::security_headers::apply,
                ))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Parley gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

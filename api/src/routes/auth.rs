//! Human-verification endpoints.
//!
//! `/verify-recaptcha` trades a successful CAPTCHA check for a signed,
//! short-lived cookie; `/verify-status` reports whether a valid one is
//! present. The trust decision itself belongs to Google — this module only
//! relays it and mints the capability token.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use parley_core::error::codes;
use parley_core::token;

use crate::error::AppError;
use crate::middleware::gate::cookie_value;
use crate::state::AppState;

const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/verify-recaptcha", post(verify_recaptcha))
        .route("/api/auth/verify-status", get(verify_status))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct VerifyRecaptchaRequest {
    /// Client-side reCAPTCHA response token
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct VerifySuccessResponse {
    pub success: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct VerifyStatusResponse {
    #[serde(rename = "isHuman")]
    pub is_human: bool,
}

/// What Google's siteverify endpoint answers. Only the verdict and its error
/// codes matter here.
#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// Verify a reCAPTCHA token and issue the verification cookie
#[utoipa::path(
    post,
    path = "/api/auth/verify-recaptcha",
    request_body = VerifyRecaptchaRequest,
    responses(
        (status = 200, description = "Verified; cookie set", body = VerifySuccessResponse),
        (status = 400, description = "Token missing or rejected", body = parley_core::error::ApiError),
        (status = 500, description = "Server misconfigured", body = parley_core::error::ApiError),
        (status = 502, description = "Verification service unavailable", body = parley_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn verify_recaptcha(
    State(state): State<AppState>,
    Json(body): Json<VerifyRecaptchaRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = body
        .token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation {
            code: codes::MISSING_TOKEN,
            message: "Missing reCAPTCHA token.".to_string(),
            details: None,
        })?;

    let secret = state
        .config
        .recaptcha_secret
        .as_deref()
        .ok_or(AppError::Misconfigured("RECAPTCHA_SECRET"))?;
    let cookie_secret = state
        .config
        .cookie_secret
        .as_deref()
        .ok_or(AppError::Misconfigured("COOKIE_SECRET"))?;

    let response = state
        .http
        .post(SITEVERIFY_URL)
        .form(&[("secret", secret), ("response", token)])
        .send()
        .await
        .map_err(|err| verification_unavailable(format!("siteverify unreachable: {err}")))?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "siteverify returned non-success status");
        return Err(verification_unavailable(
            "Verification service returned an error.".to_string(),
        ));
    }

    let verification: SiteverifyResponse = response
        .json()
        .await
        .map_err(|_| verification_unavailable("Verification service sent an unreadable response.".to_string()))?;
    check_verification(verification)?;

    let minted = token::mint(cookie_secret, Utc::now().timestamp());
    let cookie = build_cookie(
        &minted,
        state.config.production,
        state.config.cookie_domain.as_deref(),
    );

    Ok((
        [(SET_COOKIE, cookie)],
        Json(VerifySuccessResponse { success: true }),
    ))
}

/// Report whether a valid verification cookie accompanies the request
#[utoipa::path(
    get,
    path = "/api/auth/verify-status",
    responses(
        (status = 200, description = "Verification status", body = VerifyStatusResponse)
    ),
    tag = "auth"
)]
pub async fn verify_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<VerifyStatusResponse> {
    let is_human = match state.config.cookie_secret.as_deref() {
        Some(secret) => cookie_value(&headers, token::COOKIE_NAME)
            .and_then(|value| token::verify(secret, &value, Utc::now().timestamp()).ok())
            .is_some(),
        // Without the secret no cookie can be trusted.
        None => false,
    };
    Json(VerifyStatusResponse { is_human })
}

fn verification_unavailable(message: String) -> AppError {
    AppError::Upstream {
        status: Some(axum::http::StatusCode::BAD_GATEWAY),
        message,
        code: Some(codes::VERIFICATION_UNAVAILABLE.to_string()),
        details: None,
    }
}

/// Google said no → 400 with its error codes as details, so the client can
/// tell an expired challenge from a bad sitekey.
fn check_verification(verification: SiteverifyResponse) -> Result<(), AppError> {
    if verification.success {
        return Ok(());
    }
    tracing::warn!(error_codes = ?verification.error_codes, "reCAPTCHA verification rejected");
    Err(AppError::Validation {
        code: codes::VERIFICATION_FAILED,
        message: "reCAPTCHA verification failed.".to_string(),
        details: serde_json::to_value(&verification.error_codes).ok(),
    })
}

fn build_cookie(token: &str, production: bool, domain: Option<&str>) -> String {
    let mut cookie = format!(
        "{}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        token::COOKIE_NAME,
        token::TOKEN_TTL_SECS
    );
    if production {
        cookie.push_str("; Secure");
        if let Some(domain) = domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
    }
    cookie
}

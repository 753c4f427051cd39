//! Admission gate: requests reach the completion route only with a valid
//! verification cookie. Fails terminally with 403; the caller must re-run
//! human verification to get back in.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use parley_core::token;

use crate::error::AppError;
use crate::state::AppState;

pub async fn gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(secret) = state.config.cookie_secret.as_deref() else {
        return AppError::Misconfigured("COOKIE_SECRET").into_response();
    };

    let admitted = cookie_value(req.headers(), token::COOKIE_NAME)
        .and_then(|value| token::verify(secret, &value, Utc::now().timestamp()).ok());

    match admitted {
        Some(_) => next.run(req).await,
        None => AppError::AuthRequired.into_response(),
    }
}

/// Pull one cookie out of the request's `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

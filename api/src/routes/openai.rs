//! The core entry point: normalize a client conversation log and relay it to
//! the completion service. The admission gate and the throttle run as layers
//! in front of this router; by the time the handler executes, the caller is
//! verified and within budget.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use parley_core::normalize::normalize_logs;

use crate::error::AppError;
use crate::openai;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/openai/submit-logs", post(submit_logs))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SubmitLogsResponse {
    pub ok: bool,
    /// Text produced by the model; may be empty
    pub text: String,
}

/// Normalize a conversation log and fetch the model's reply
#[utoipa::path(
    post,
    path = "/api/openai/submit-logs",
    responses(
        (status = 200, description = "Completion produced", body = SubmitLogsResponse),
        (status = 400, description = "Malformed or empty-after-normalization input", body = parley_core::error::ApiError),
        (status = 403, description = "Human verification required", body = parley_core::error::ApiError),
        (status = 429, description = "Request cap exceeded", body = parley_core::error::ApiError),
        (status = 500, description = "Server misconfigured", body = parley_core::error::ApiError)
    ),
    tag = "openai"
)]
pub async fn submit_logs(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<SubmitLogsResponse>, AppError> {
    let payload = normalize_logs(&body)?;

    let api_key = state
        .config
        .openai_api_key
        .as_deref()
        .ok_or(AppError::Misconfigured("OPENAI_API_KEY"))?;

    let text = openai::create_response(&state.http, api_key, &payload).await?;
    Ok(Json(SubmitLogsResponse { ok: true, text }))
}

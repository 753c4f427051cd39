use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parley_core::error::{ApiError, codes};
use parley_core::normalize::NormalizeError;

use crate::middleware::throttle;
use crate::openai::OpenAiError;

/// Internal error type that converts to structured API responses.
///
/// One variant per taxonomy row; every pipeline stage fails fast with one of
/// these and nothing downgrades a later stage's rejection.
#[derive(Debug)]
pub enum AppError {
    /// No valid verification token accompanied the request (403)
    AuthRequired,
    /// Fixed-window request cap exceeded (429)
    RateLimited { retry_after_secs: u64 },
    /// Malformed or empty-after-normalization input (400)
    Validation {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    /// Completion-service failure, status mirrored to the caller
    Upstream {
        status: Option<StatusCode>,
        message: String,
        code: Option<String>,
        details: Option<serde_json::Value>,
    },
    /// A required server secret is absent (500). The body names nothing; the
    /// missing variable goes to the error log for the operator.
    Misconfigured(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, body) = match self {
            AppError::AuthRequired => (
                StatusCode::FORBIDDEN,
                ApiError::new(
                    codes::RECAPTCHA_REQUIRED,
                    "Human verification is required before submitting logs.",
                    request_id,
                ),
            ),
            AppError::RateLimited { retry_after_secs } => {
                let body = ApiError::new(
                    codes::RATE_LIMIT_EXCEEDED,
                    format!("Too many requests. Retry after {retry_after_secs} seconds."),
                    request_id,
                );
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                insert_numeric(headers, "retry-after", retry_after_secs);
                insert_numeric(headers, "ratelimit-limit", u64::from(throttle::LIMIT));
                insert_numeric(headers, "ratelimit-remaining", 0);
                insert_numeric(headers, "ratelimit-reset", retry_after_secs);
                return response;
            }
            AppError::Validation {
                code,
                message,
                details,
            } => {
                let mut body = ApiError::new(code, message, request_id);
                if let Some(details) = details {
                    body = body.with_details(details);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            AppError::Upstream {
                status,
                message,
                code,
                details,
            } => {
                let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                tracing::warn!(status = %status, code = code.as_deref(), "upstream failure: {message}");
                let mut body = ApiError::new(
                    code.unwrap_or_else(|| codes::UPSTREAM_ERROR.to_string()),
                    message,
                    request_id,
                );
                if let Some(details) = details {
                    body = body.with_details(details);
                }
                (status, body)
            }
            AppError::Misconfigured(variable) => {
                tracing::error!(variable, "required configuration is missing");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(
                        codes::SERVER_MISCONFIGURED,
                        "The server is missing required configuration.",
                        request_id,
                    ),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn insert_numeric(headers: &mut axum::http::HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        let message = err.to_string();
        match err {
            NormalizeError::InvalidInput => AppError::Validation {
                code: codes::INVALID_INPUT,
                message,
                details: None,
            },
            NormalizeError::NoValidMessages => AppError::Validation {
                code: codes::NO_VALID_MESSAGES,
                message,
                details: None,
            },
            NormalizeError::IllegalContentType { positions } => AppError::Validation {
                code: codes::ILLEGAL_CONTENT_TYPE,
                message,
                details: serde_json::to_value(positions).ok(),
            },
        }
    }
}

impl From<OpenAiError> for AppError {
    fn from(err: OpenAiError) -> Self {
        AppError::Upstream {
            status: err.status,
            message: err.message,
            code: err.code,
            details: err.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use parley_core::normalize::{IllegalPart, NormalizeError};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn auth_required_is_403_with_stable_code() {
        let response = AppError::AuthRequired.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "RECAPTCHA_REQUIRED");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_headers() {
        let response = AppError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["ratelimit-limit"], "20");
        assert_eq!(response.headers()["ratelimit-remaining"], "0");
        assert_eq!(response.headers()["ratelimit-reset"], "42");
        let body = body_json(response).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn normalize_errors_map_to_400_with_their_codes() {
        for (err, code) in [
            (NormalizeError::InvalidInput, "INVALID_INPUT"),
            (NormalizeError::NoValidMessages, "NO_VALID_MESSAGES"),
            (
                NormalizeError::IllegalContentType {
                    positions: vec![IllegalPart {
                        message_index: 0,
                        part_index: 1,
                        role: "user".to_string(),
                    }],
                },
                "ILLEGAL_CONTENT_TYPE",
            ),
        ] {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["code"], code);
        }
    }

    #[tokio::test]
    async fn illegal_content_type_details_name_the_offending_parts() {
        let err = NormalizeError::IllegalContentType {
            positions: vec![IllegalPart {
                message_index: 3,
                part_index: 0,
                role: "assistant".to_string(),
            }],
        };
        let body = body_json(AppError::from(err).into_response()).await;
        assert_eq!(body["details"][0]["message_index"], 3);
        assert_eq!(body["details"][0]["role"], "assistant");
    }

    #[tokio::test]
    async fn upstream_status_is_mirrored_and_falls_back_to_500() {
        let mirrored = AppError::Upstream {
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            message: "overloaded".to_string(),
            code: None,
            details: None,
        }
        .into_response();
        assert_eq!(mirrored.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(mirrored).await;
        assert_eq!(body["code"], "UPSTREAM_ERROR");

        let fallback = AppError::Upstream {
            status: None,
            message: "connection reset".to_string(),
            code: Some("connection_error".to_string()),
            details: None,
        }
        .into_response();
        assert_eq!(fallback.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(fallback).await;
        assert_eq!(body["code"], "connection_error");
    }

    #[tokio::test]
    async fn misconfigured_never_names_the_missing_secret() {
        let response = AppError::Misconfigured("COOKIE_SECRET").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "SERVER_MISCONFIGURED");
        assert!(
            !body["message"]
                .as_str()
                .expect("message is a string")
                .contains("COOKIE_SECRET")
        );
    }
}

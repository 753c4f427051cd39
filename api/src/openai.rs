//! Upstream invoker for the OpenAI Responses API.
//!
//! Takes an already-normalized payload, never retries, and surfaces upstream
//! failures verbatim so the original caller can decide whether to retry.

use axum::http::StatusCode;
use parley_core::normalize::NormalizedMessage;
use serde_json::{Value, json};
use thiserror::Error;

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Fixed model and sampling temperature. The temperature is a product choice
/// (deterministic-ish but not zero), not a correctness requirement.
const MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.5;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct OpenAiError {
    /// HTTP status of the upstream response; `None` for transport failures,
    /// which the edge maps to 500.
    pub status: Option<StatusCode>,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
}

/// Send a normalized conversation to the Responses API and return the
/// produced text (possibly empty).
pub async fn create_response(
    client: &reqwest::Client,
    api_key: &str,
    payload: &[NormalizedMessage],
) -> Result<String, OpenAiError> {
    let response = client
        .post(RESPONSES_URL)
        .bearer_auth(api_key)
        .json(&json!({
            "model": MODEL,
            "input": payload,
            "temperature": TEMPERATURE,
        }))
        .send()
        .await
        .map_err(|err| OpenAiError {
            status: None,
            message: format!("completion service unreachable: {err}"),
            code: None,
            details: None,
        })?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(parse_error_body(status, &body));
    }

    Ok(extract_output_text(&body))
}

/// Concatenate every `output_text` part of the response's `output` items.
/// A response with no text parts yields the empty string.
fn extract_output_text(body: &Value) -> String {
    let Some(items) = body.get("output").and_then(Value::as_array) else {
        return String::new();
    };

    let mut text = String::new();
    for item in items {
        let Some(parts) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(chunk) = part.get("text").and_then(Value::as_str) {
                    text.push_str(chunk);
                }
            }
        }
    }
    text
}

/// Map a non-success upstream response to an error the caller can branch on.
/// The standard envelope is `{"error": {"message", "type", "code"}}`; the raw
/// body travels along as details either way.
fn parse_error_body(status: StatusCode, body: &Value) -> OpenAiError {
    let envelope = body.get("error");
    let message = envelope
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("completion service returned an error")
        .to_string();
    let code = envelope
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(Value::as_str)
        .map(str::to_string);

    OpenAiError {
        status: Some(status),
        message,
        code,
        details: (!body.is_null()).then(|| body.clone()),
    }
}

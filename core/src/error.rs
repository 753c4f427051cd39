use serde::Serialize;
use utoipa::ToSchema;

/// Structured rejection body returned by every failing endpoint.
/// Clients branch on `code`, humans read `message`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Always `false` on a rejection — mirror of the `ok: true` success shape
    pub ok: bool,
    /// Stable machine-readable error code (e.g. "RECAPTCHA_REQUIRED")
    pub code: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Structured extra context (offending parts, upstream body, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, request_id: String) -> Self {
        Self {
            ok: false,
            code: code.into(),
            message: message.into(),
            details: None,
            request_id,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Error codes used across the API
pub mod codes {
    /// No valid verification cookie accompanied the request (403)
    pub const RECAPTCHA_REQUIRED: &str = "RECAPTCHA_REQUIRED";
    /// Fixed-window request cap exceeded (429)
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    /// Request body is not an array of log entries (400)
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    /// Every entry was dropped during normalization (400)
    pub const NO_VALID_MESSAGES: &str = "NO_VALID_MESSAGES";
    /// A normalized part carried the disallowed raw type "text" (400)
    pub const ILLEGAL_CONTENT_TYPE: &str = "ILLEGAL_CONTENT_TYPE";
    /// Verification request arrived without a captcha token (400)
    pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
    /// The captcha provider rejected the supplied token (400)
    pub const VERIFICATION_FAILED: &str = "VERIFICATION_FAILED";
    /// The captcha provider itself errored or was unreachable (502)
    pub const VERIFICATION_UNAVAILABLE: &str = "VERIFICATION_UNAVAILABLE";
    /// Completion service failure surfaced to the caller
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    /// A required server secret is absent (500, operator action)
    pub const SERVER_MISCONFIGURED: &str = "SERVER_MISCONFIGURED";
}

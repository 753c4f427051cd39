use std::sync::Arc;
use std::time::Duration;

use crate::middleware::throttle::SlidingControl;

/// Upstream calls share one connection pool; the completion service can take
/// a while on long conversations, hence the generous timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct AppConfig {
    /// Google reCAPTCHA server-side secret. Absent → verification requests
    /// fail per-request with 500; the server still boots.
    pub recaptcha_secret: Option<String>,
    /// Key for the HMAC signature on the verification cookie.
    pub cookie_secret: Option<String>,
    /// Bearer credential for the completion service.
    pub openai_api_key: Option<String>,
    /// Production deployments mark the cookie `Secure` and scope it to
    /// `cookie_domain`.
    pub production: bool,
    pub cookie_domain: Option<String>,
    /// When behind a reverse proxy, take the client identity from the first
    /// `X-Forwarded-For` entry instead of the peer address.
    pub trust_proxy: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            recaptcha_secret: non_empty_env("RECAPTCHA_SECRET"),
            cookie_secret: non_empty_env("COOKIE_SECRET"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            production: flag_env("PARLEY_PRODUCTION"),
            cookie_domain: non_empty_env("PARLEY_COOKIE_DOMAIN"),
            trust_proxy: flag_env("PARLEY_TRUST_PROXY"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag_env(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true").unwrap_or(false)
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub throttle: Arc<SlidingControl>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("client construction cannot fail with static options"),
            throttle: Arc::new(SlidingControl::default()),
        }
    }
}

#[cfg(test)]
impl AppConfig {
    /// Config with every secret present, for router tests.
    pub fn for_tests() -> Self {
        Self {
            recaptcha_secret: Some("test-recaptcha-secret".to_string()),
            cookie_secret: Some("test-cookie-secret-at-least-32-chars".to_string()),
            openai_api_key: Some("test-api-key".to_string()),
            production: false,
            cookie_domain: None,
            trust_proxy: false,
        }
    }
}

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Cookie the verification token travels in.
pub const COOKIE_NAME: &str = "isHuman";

/// Token lifetime: 10 minutes.
pub const TOKEN_TTL_SECS: i64 = 10 * 60;

/// Fixed flag value. The token asserts exactly one fact.
const FLAG: &str = "true";

/// Decoded verification token. Existence of a value of this type means the
/// signature verified and the token was unexpired at the supplied clock.
///
/// Wire format: `base64url_nopad("true:<issued>:<expires>:<hmac_hex>")` where
/// the HMAC-SHA256 is keyed by the server cookie secret and covers
/// `"true:<issued>:<expires>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationToken {
    /// Unix seconds at mint time
    pub issued_at: i64,
    /// Unix seconds past which the token is no longer trusted
    pub expires_at: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,
    #[error("token payload has the wrong shape")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

/// Mint a signed verification token issued at `now` (unix seconds).
pub fn mint(secret: &str, now: i64) -> String {
    let expires_at = now + TOKEN_TTL_SECS;
    let payload = format!("{FLAG}:{now}:{expires_at}");
    let signature = sign(secret, &payload);
    URL_SAFE_NO_PAD.encode(format!("{payload}:{signature}"))
}

/// Verify a token string against `secret` at clock `now` (unix seconds).
///
/// Signature is checked before expiry, in constant time, so a forged token
/// learns nothing from the error variant ordering.
pub fn verify(secret: &str, token: &str, now: i64) -> Result<VerificationToken, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| TokenError::Encoding)?;
    let raw = String::from_utf8(raw).map_err(|_| TokenError::Encoding)?;

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 || parts[0] != FLAG {
        return Err(TokenError::Malformed);
    }
    let issued_at: i64 = parts[1].parse().map_err(|_| TokenError::Malformed)?;
    let expires_at: i64 = parts[2].parse().map_err(|_| TokenError::Malformed)?;

    let payload = format!("{}:{}:{}", parts[0], parts[1], parts[2]);
    let expected = sign(secret, &payload);
    if !bool::from(parts[3].as_bytes().ct_eq(expected.as_bytes())) {
        return Err(TokenError::BadSignature);
    }

    if now >= expires_at {
        return Err(TokenError::Expired);
    }

    Ok(VerificationToken {
        issued_at,
        expires_at,
    })
}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

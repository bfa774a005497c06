//! Bearer-token authentication.
//!
//! Tokens are opaque HMAC-SHA256 signed strings of the form
//! `{subject}.{expiry}.{signature}`. There is no server-side session table;
//! rotating the signing secret invalidates everything outstanding.

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use memoh_users::{Directory, User};

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

// Tool-side requests authenticate with the session token minted for the
// round instead of a user bearer token. Same header the gateway client
// attaches on the way out.
pub use memoh_agent::HEADER_SESSION_TOKEN;

#[derive(Clone)]
pub struct TokenSigner {
    secret: String,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    /// Mint a bearer token for `subject` valid for `ttl_secs`.
    pub fn mint(&self, subject: &str, ttl_secs: i64) -> String {
        let expires = Utc::now().timestamp() + ttl_secs;
        let payload = format!("{subject}.{expires}");
        format!("{payload}.{}", self.sign(&payload))
    }

    /// Verify a token and return its subject, or `None` when the signature
    /// is wrong or the token has expired.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (payload, signature) = token.rsplit_once('.')?;
        let expected = hex::decode(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).ok()?;

        let (subject, expires) = payload.rsplit_once('.')?;
        let expires: i64 = expires.parse().ok()?;
        if expires < Utc::now().timestamp() {
            return None;
        }
        Some(subject.to_string())
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl memoh_scheduler::TokenMinter for TokenSigner {
    fn mint(&self, user_id: &str, ttl_secs: i64) -> Result<String, String> {
        Ok(TokenSigner::mint(self, user_id, ttl_secs))
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the request's credential to an active user. Accepts a bearer
/// token or, for tool-side calls, the session-token header minted for the
/// round.
pub fn authenticate(
    signer: &TokenSigner,
    directory: &Directory,
    headers: &HeaderMap,
) -> Result<User, ApiError> {
    let token = extract_bearer(headers)
        .or_else(|| {
            headers
                .get(HEADER_SESSION_TOKEN)
                .and_then(|v| v.to_str().ok())
        })
        .ok_or_else(|| ApiError::unauthorized("missing bearer or session token"))?;
    let subject = signer
        .verify(token)
        .ok_or_else(|| ApiError::unauthorized("invalid or expired token"))?;
    let user = directory
        .get_user(&subject)?
        .ok_or_else(|| ApiError::unauthorized("token subject no longer exists"))?;
    if !user.active {
        return Err(ApiError::unauthorized("account disabled"));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_verify_round_trip() {
        let signer = TokenSigner::new("secret");
        let token = signer.mint("user-1", 60);
        assert_eq!(signer.verify(&token).as_deref(), Some("user-1"));
    }

    #[test]
    fn expired_and_tampered_tokens_fail() {
        let signer = TokenSigner::new("secret");

        let expired = signer.mint("user-1", -120);
        assert!(signer.verify(&expired).is_none());

        let token = signer.mint("user-1", 60);
        let tampered = token.replacen("user-1", "user-2", 1);
        assert!(signer.verify(&tampered).is_none());

        let other = TokenSigner::new("different");
        assert!(other.verify(&token).is_none());
    }
}

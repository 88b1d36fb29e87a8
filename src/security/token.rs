use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Bump to invalidate every outstanding session.
pub const TOKEN_VERSION: &str = "v2";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("SESSION_SECRET not configured")]
    NotConfigured,
    #[error("signing key rejected")]
    InvalidKey,
    #[error("token encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Claims carried by a session token. Field order is part of the signed
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub version: String,
    pub username: String,
    pub timestamp: i64,
    pub nonce: String,
    pub fingerprint: String,
    pub env: String,
}

#[derive(Serialize, Deserialize)]
struct SignedToken {
    #[serde(flatten)]
    payload: TokenPayload,
    signature: String,
}

/// Issues and verifies HMAC-SHA256 session tokens fenced to one
/// environment.
pub struct TokenService {
    secret: Option<String>,
    max_age_ms: i64,
    env: String,
}

impl TokenService {
    pub fn new(secret: Option<String>, max_age_secs: u64, env: &str) -> Self {
        TokenService {
            secret: secret.filter(|s| !s.is_empty()),
            max_age_ms: (max_age_secs as i64).saturating_mul(1000),
            env: env.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        TokenService::new(
            config.session_secret.clone(),
            config.session_max_age_secs,
            config.environment.as_str(),
        )
    }

    /// Expiry of a verified session as an RFC 3339 timestamp.
    pub fn expires_at(&self, claims: &TokenPayload) -> Option<String> {
        chrono::DateTime::<Utc>::from_timestamp_millis(claims.timestamp.saturating_add(self.max_age_ms))
            .map(|t| t.to_rfc3339())
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age_ms / 1000
    }

    fn sign(secret: &str, data: &[u8]) -> Result<String, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::InvalidKey)?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn random_hex(len: usize) -> String {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }

    pub fn issue(&self, username: &str) -> Result<String, TokenError> {
        self.issue_at(username, Utc::now().timestamp_millis())
    }

    fn issue_at(&self, username: &str, timestamp: i64) -> Result<String, TokenError> {
        let secret = self.secret.as_deref().ok_or(TokenError::NotConfigured)?;
        let payload = TokenPayload {
            version: TOKEN_VERSION.to_string(),
            username: username.to_string(),
            timestamp,
            nonce: Self::random_hex(16),
            fingerprint: Self::random_hex(8),
            env: self.env.clone(),
        };
        let signature = Self::sign(secret, &serde_json::to_vec(&payload)?)?;
        let body = serde_json::to_vec(&SignedToken { payload, signature })?;
        Ok(URL_SAFE_NO_PAD.encode(body))
    }

    fn decode(token: &str) -> Option<SignedToken> {
        let token = token.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .or_else(|_| URL_SAFE.decode(token))
            .or_else(|_| STANDARD.decode(token))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Returns the claims when the token is authentic, current, and was
    /// issued for this environment.
    pub fn verify(&self, token: &str) -> Option<TokenPayload> {
        self.verify_at(token, Utc::now().timestamp_millis())
    }

    fn verify_at(&self, token: &str, now_ms: i64) -> Option<TokenPayload> {
        let secret = self.secret.as_deref()?;
        if token.is_empty() {
            return None;
        }
        let signed = Self::decode(token)?;
        let payload = signed.payload;
        if payload.version != TOKEN_VERSION {
            return None;
        }
        let expected = Self::sign(secret, &serde_json::to_vec(&payload).ok()?).ok()?;
        if !super::constant_time_eq(signed.signature.as_bytes(), expected.as_bytes()) {
            return None;
        }
        let age = now_ms - payload.timestamp;
        if age < 0 || age > self.max_age_ms {
            return None;
        }
        if payload.env != self.env {
            log::warn!(
                "Rejected session token issued for '{}' in '{}'",
                payload.env,
                self.env
            );
            return None;
        }
        Some(payload)
    }

    /// Per-render CSRF token bound to a session token.
    pub fn csrf_token(&self, session_token: &str) -> String {
        match self.secret.as_deref() {
            Some(secret) if !session_token.is_empty() => {
                let data = format!("csrf:{}:{}", session_token, Utc::now().timestamp_millis());
                match Self::sign(secret, data.as_bytes()) {
                    Ok(mut sig) => {
                        sig.truncate(32);
                        sig
                    }
                    Err(e) => {
                        log::error!("CSRF token unavailable: {}", e);
                        String::new()
                    }
                }
            }
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(env: &str) -> TokenService {
        TokenService::new(Some("test-secret".into()), 8 * 60 * 60, env)
    }

    #[test]
    fn issue_then_verify() {
        let svc = service("development");
        let token = svc.issue("admin").unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.version, TOKEN_VERSION);
        assert_eq!(claims.nonce.len(), 32);
        assert_eq!(claims.fingerprint.len(), 16);
    }

    #[test]
    fn tokens_are_unique() {
        let svc = service("development");
        assert_ne!(svc.issue("admin").unwrap(), svc.issue("admin").unwrap());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let svc = service("development");
        let token = svc.issue("admin").unwrap();
        let mut signed = TokenService::decode(&token).unwrap();
        signed.payload.username = "root".into();
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&signed).unwrap());
        assert!(svc.verify(&forged).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = service("development").issue("admin").unwrap();
        let other = TokenService::new(Some("another".into()), 3600, "development");
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn expiry_and_future_timestamps() {
        let svc = TokenService::new(Some("s".into()), 60, "development");
        let now = Utc::now().timestamp_millis();
        let stale = svc.issue_at("admin", now - 61_000).unwrap();
        assert!(svc.verify_at(&stale, now).is_none());
        let fresh = svc.issue_at("admin", now - 59_000).unwrap();
        assert!(svc.verify_at(&fresh, now).is_some());
        let future = svc.issue_at("admin", now + 10_000).unwrap();
        assert!(svc.verify_at(&future, now).is_none());
    }

    #[test]
    fn environment_fence() {
        let dev = service("development").issue("admin").unwrap();
        assert!(service("production").verify(&dev).is_none());
    }

    #[test]
    fn standard_base64_is_accepted() {
        let svc = service("development");
        let token = svc.issue("admin").unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let classic = STANDARD.encode(bytes);
        assert!(svc.verify(&classic).is_some());
    }

    #[test]
    fn garbage_and_unconfigured() {
        let svc = service("development");
        assert!(svc.verify("").is_none());
        assert!(svc.verify("!!not-a-token!!").is_none());

        let bare = TokenService::new(None, 3600, "development");
        assert!(matches!(bare.issue("admin"), Err(TokenError::NotConfigured)));
        assert!(bare.csrf_token("abc").is_empty());
    }

    #[test]
    fn expiry_follows_issue_time() {
        let svc = TokenService::new(Some("s".into()), 60, "development");
        let claims = svc.verify(&svc.issue("admin").unwrap()).unwrap();
        let expires = chrono::DateTime::parse_from_rfc3339(&svc.expires_at(&claims).unwrap()).unwrap();
        assert_eq!(expires.timestamp_millis(), claims.timestamp + 60_000);
    }

    #[test]
    fn signatures_are_hex_and_stable() {
        let a = TokenService::sign("k", b"payload").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, TokenService::sign("k", b"payload").unwrap());
        assert_ne!(a, TokenService::sign("other", b"payload").unwrap());
        assert!(TokenService::sign("", b"payload").is_ok());
    }

    #[test]
    fn csrf_token_shape() {
        let svc = service("development");
        let csrf = svc.csrf_token("session");
        assert_eq!(csrf.len(), 32);
        assert!(svc.csrf_token("").is_empty());
    }
}

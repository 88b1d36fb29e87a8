use log::error;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};

use super::constant_time_eq;
use super::token::{TokenPayload, TokenService};
use crate::api::GuardFailure;
use crate::config::AppConfig;

pub const SESSION_COOKIE: &str = "admin_token";

// ── Client IP request guard ──

/// Client address as reported by the proxy chain.
/// Checks, in order:
///   1. X-Forwarded-For (first IP in the chain = original client)
///   2. X-Real-IP
///   3. Rocket's client_ip() (socket peer address)
pub struct ClientIp(pub String);

pub fn client_ip(request: &Request<'_>) -> String {
    let headers = request.headers();

    if let Some(forwarded) = headers.get_one("X-Forwarded-For") {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    if let Some(ip) = headers.get_one("X-Real-IP") {
        let ip = ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    request
        .client_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(ClientIp(client_ip(request)))
    }
}

// ── Admin session guard ──

/// Session token from the `admin_token` cookie, else `Authorization: Bearer`.
pub fn request_token(request: &Request<'_>) -> Option<String> {
    if let Some(cookie) = request.cookies().get(SESSION_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    request
        .headers()
        .get_one("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Guard: a request carrying a valid session token.
pub struct AdminSession {
    pub username: String,
    pub token: String,
    pub claims: TokenPayload,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminSession {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let tokens = match request.rocket().state::<TokenService>() {
            Some(t) => t,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let verified = request_token(request)
            .and_then(|token| tokens.verify(&token).map(|claims| (token, claims)));
        match verified {
            Some((token, claims)) => Outcome::Success(AdminSession {
                username: claims.username.clone(),
                token,
                claims,
            }),
            None => {
                request.local_cache(|| Some(GuardFailure::new("UNAUTHORIZED", "Unauthorized")));
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

// ── CSRF origin guard ──

/// `host[:port]` of an `Origin` header value.
fn origin_host(origin: &str) -> Option<String> {
    let url = url::Url::parse(origin).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Same-origin check for state-changing requests. Outside production every
/// request passes; in production a present `Origin` must name the `Host`.
pub fn origin_allowed(config: &AppConfig, origin: Option<&str>, host: Option<&str>) -> bool {
    if !config.is_production() {
        return true;
    }
    let origin = match origin {
        Some(o) => o,
        None => return true,
    };
    match (origin_host(origin), host) {
        (Some(o), Some(h)) => o.eq_ignore_ascii_case(h.trim()),
        _ => false,
    }
}

pub struct SameOrigin;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SameOrigin {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match request.rocket().state::<AppConfig>() {
            Some(c) => c,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let headers = request.headers();
        if origin_allowed(config, headers.get_one("Origin"), headers.get_one("Host")) {
            Outcome::Success(SameOrigin)
        } else {
            request.local_cache(|| Some(GuardFailure::new("FORBIDDEN", "Invalid request origin")));
            Outcome::Error((Status::Forbidden, ()))
        }
    }
}

// ── Credentials ──

/// Checks both halves unconditionally so a wrong username costs the same as
/// a wrong password.
pub fn validate_credentials(config: &AppConfig, username: &str, password: &str) -> bool {
    let expected_user = match config.admin_username.as_deref() {
        Some(u) => u,
        None => {
            error!("Authentication not configured");
            return false;
        }
    };
    let user_ok = constant_time_eq(username.as_bytes(), expected_user.as_bytes());
    let pass_ok = match (&config.admin_password_hash, &config.admin_password) {
        (Some(hash), _) => bcrypt::verify(password, hash).unwrap_or(false),
        (None, Some(plain)) => constant_time_eq(password.as_bytes(), plain.as_bytes()),
        (None, None) => {
            error!("Authentication not configured");
            false
        }
    };
    user_ok & pass_ok
}

// ── Session cookie ──

pub fn set_session_cookie(cookies: &CookieJar<'_>, token: &str, max_age_secs: i64, secure: bool) {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    cookie.set_max_age(rocket::time::Duration::seconds(max_age_secs));
    if secure {
        cookie.set_secure(true);
    }
    cookies.add(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    cookies.remove(cookie);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn production() -> AppConfig {
        AppConfig {
            environment: Environment::Production,
            ..AppConfig::default()
        }
    }

    #[test]
    fn origin_rules() {
        let dev = AppConfig::default();
        assert!(origin_allowed(&dev, Some("https://evil.example"), Some("site.example")));

        let prod = production();
        assert!(origin_allowed(&prod, None, Some("site.example")));
        assert!(origin_allowed(&prod, Some("https://site.example"), Some("site.example")));
        assert!(origin_allowed(&prod, Some("http://localhost:8000"), Some("localhost:8000")));
        assert!(!origin_allowed(&prod, Some("https://evil.example"), Some("site.example")));
        assert!(!origin_allowed(&prod, Some("http://localhost:9000"), Some("localhost:8000")));
        assert!(!origin_allowed(&prod, Some("null"), Some("site.example")));
        assert!(!origin_allowed(&prod, Some("https://site.example"), None));
    }

    #[test]
    fn plaintext_credentials() {
        let cfg = AppConfig {
            admin_username: Some("admin".into()),
            admin_password: Some("hunter22".into()),
            ..AppConfig::default()
        };
        assert!(validate_credentials(&cfg, "admin", "hunter22"));
        assert!(!validate_credentials(&cfg, "admin", "hunter2"));
        assert!(!validate_credentials(&cfg, "root", "hunter22"));
    }

    #[test]
    fn hashed_credentials_take_precedence() {
        let cfg = AppConfig {
            admin_username: Some("admin".into()),
            admin_password: Some("plain".into()),
            admin_password_hash: Some(bcrypt::hash("hashed", 4).unwrap()),
            ..AppConfig::default()
        };
        assert!(validate_credentials(&cfg, "admin", "hashed"));
        assert!(!validate_credentials(&cfg, "admin", "plain"));
    }

    #[test]
    fn unconfigured_always_fails() {
        let cfg = AppConfig::default();
        assert!(!validate_credentials(&cfg, "", ""));
    }
}

use std::sync::Arc;

use log::{error, info, warn};
use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::record;
use crate::api::{ApiError, ApiResponse, ApiResult};
use crate::config::AppConfig;
use crate::models::activity::{ActivityAction, ActivityEntry};
use crate::security::auth::{
    clear_session_cookie, set_session_cookie, validate_credentials, AdminSession, ClientIp,
    SameOrigin,
};
use crate::security::token::TokenService;
use crate::store::Store;
use crate::validation::FieldError;

const RESOURCE: &str = "session";

/// Login body: both fields required, non-empty strings.
fn parse_login(body: &Value) -> Result<(String, String), Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut field = |name: &str| match body.get(name).and_then(Value::as_str) {
        Some(v) if !v.is_empty() && v.len() <= 200 => Some(v.to_string()),
        _ => {
            errors.push(FieldError::new(name, format!("{} is required", name)));
            None
        }
    };
    let username = field("username");
    let password = field("password");
    match (username, password) {
        (Some(u), Some(p)) => Ok((u.trim().to_string(), p)),
        _ => Err(errors),
    }
}

#[post("/auth", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn login(
    _origin: SameOrigin,
    ip: ClientIp,
    body: Json<Value>,
    cookies: &CookieJar<'_>,
    config: &State<AppConfig>,
    tokens: &State<TokenService>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    let (username, password) = parse_login(&body).map_err(ApiError::validation)?;

    if !validate_credentials(config, &username, &password) {
        warn!("Failed login attempt for '{}' from {}", username, ip.0);
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = tokens.issue(&username).map_err(|e| {
        error!("Token generation failed: {}", e);
        ApiError::unavailable("Authentication service unavailable")
    })?;
    set_session_cookie(cookies, &token, tokens.max_age_secs(), config.is_production());

    info!("Admin '{}' logged in from {}", username, ip.0);
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Login, RESOURCE, &username)
            .with_details(json!({ "ip": ip.0 })),
    );
    Ok(ApiResponse::ok(json!({
        "message": "Login successful",
        "expiresIn": tokens.max_age_secs(),
    })))
}

#[delete("/auth")]
pub fn logout(
    _origin: SameOrigin,
    session: Option<AdminSession>,
    cookies: &CookieJar<'_>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    clear_session_cookie(cookies);
    if let Some(session) = session {
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Logout, RESOURCE, &session.username),
        );
    }
    Ok(ApiResponse::ok(json!({ "message": "Logout successful" })))
}

#[get("/auth")]
pub fn status(session: Option<AdminSession>, tokens: &State<TokenService>) -> ApiResult {
    let data = match session {
        Some(s) => json!({
            "authenticated": true,
            "username": s.username,
            "csrfToken": tokens.csrf_token(&s.token),
            "expiresAt": tokens.expires_at(&s.claims),
        }),
        None => json!({ "authenticated": false }),
    };
    Ok(ApiResponse::ok(data))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![login, logout, status]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_body_rules() {
        let (u, p) = parse_login(&json!({"username": " admin ", "password": "pw"})).unwrap();
        assert_eq!((u.as_str(), p.as_str()), ("admin", "pw"));

        let errors = parse_login(&json!({"username": ""})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(parse_login(&json!({"username": "a", "password": 5})).is_err());
    }
}

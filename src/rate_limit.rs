use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::uri::Origin;
use rocket::http::{Header, Method, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Data, Request, Response};
use serde_json::{json, Value};

use crate::config::RateLimitConfig;
use crate::security::auth::client_ip;

/// Windows are pruned once every this many checks.
const PRUNE_EVERY: u64 = 100;

/// Internal route that answers requests rejected by the limiter.
pub const THROTTLED_PATH: &str = "/api/__throttled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Api,
    Auth,
    Upload,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Api => "api",
            Category::Auth => "auth",
            Category::Upload => "upload",
        }
    }

    /// Bucket for a request, or `None` when the path is not rate limited.
    pub fn classify(method: Method, path: &str) -> Option<Category> {
        if !path.starts_with("/api/") {
            return None;
        }
        if path == "/api/auth" && method == Method::Post {
            return Some(Category::Auth);
        }
        if path == "/api/upload" {
            return Some(Category::Upload);
        }
        Some(Category::Api)
    }

    pub fn limit(&self, config: &RateLimitConfig) -> u64 {
        match self {
            Category::Api => config.api,
            Category::Auth => config.auth,
            Category::Upload => config.upload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Seconds until the window resets; zero when allowed.
    pub retry_after: u64,
}

/// In-memory fixed-window counters keyed by `"<ip>:<category>"`.
/// State is lost on restart.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
    checks: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, key: &str, max: u64, window: Duration) -> RateDecision {
        self.check_at(key, max, window, Instant::now())
    }

    fn check_at(&self, key: &str, max: u64, window: Duration, now: Instant) -> RateDecision {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(window, now);
        }

        let mut map = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let entry = map.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) > window {
            *entry = (0, now);
        }

        if entry.0 >= max {
            let left = window.saturating_sub(now.duration_since(entry.1));
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: secs.max(1),
            };
        }

        entry.0 += 1;
        RateDecision {
            allowed: true,
            remaining: max - entry.0,
            retry_after: 0,
        }
    }

    /// Drop windows that have fully elapsed.
    pub fn prune(&self, window: Duration, now: Instant) {
        let mut map = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, (_, started)| now.duration_since(*started) <= window);
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|m| m.len()).unwrap_or(0)
    }
}

// ── Fairing ─────────────────────────────────────────────

/// Decision for the current request, cached for the response phase.
#[derive(Debug, Clone, Copy)]
struct Limited(Option<RateDecision>);

pub struct RateLimitFairing {
    pub config: RateLimitConfig,
}

#[rocket::async_trait]
impl Fairing for RateLimitFairing {
    fn info(&self) -> Info {
        Info {
            name: "Rate Limiter",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _data: &mut Data<'_>) {
        let category = match Category::classify(request.method(), request.uri().path().as_str()) {
            Some(c) => c,
            None => return,
        };
        let limiter = match request.rocket().state::<RateLimiter>() {
            Some(l) => l,
            None => return,
        };
        let ip = client_ip(request);
        let key = format!("{}:{}", ip, category.as_str());
        let decision = limiter.check(
            &key,
            category.limit(&self.config),
            Duration::from_secs(self.config.window_secs),
        );
        request.local_cache(|| Limited(Some(decision)));

        if !decision.allowed {
            warn!("Rate limit exceeded for {} ({})", ip, category.as_str());
            request.set_method(Method::Get);
            request.set_uri(Origin::parse(THROTTLED_PATH).unwrap_or_else(|_| Origin::ROOT));
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let decision = match req.local_cache(|| Limited(None)).0 {
            Some(d) => d,
            None => return,
        };
        res.set_header(Header::new("X-RateLimit-Remaining", decision.remaining.to_string()));
        if !decision.allowed {
            res.set_status(Status::TooManyRequests);
            res.set_header(Header::new("Retry-After", decision.retry_after.to_string()));
        }
    }
}

/// Seconds a throttled client should wait, from the cached decision.
/// Forwards unless the limiter rejected this request, so the throttled
/// route cannot be hit directly.
pub struct RetryAfter(pub u64);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RetryAfter {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.local_cache(|| Limited(None)).0 {
            Some(d) if !d.allowed => Outcome::Success(RetryAfter(d.retry_after)),
            _ => Outcome::Forward(Status::NotFound),
        }
    }
}

/// Target of rewritten over-limit requests. The original handler never runs.
#[get("/__throttled")]
pub fn throttled(retry: RetryAfter) -> (Status, Json<Value>) {
    (
        Status::TooManyRequests,
        Json(json!({ "error": "Too many requests", "retryAfter": retry.0 })),
    )
}

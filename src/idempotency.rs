use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use serde_json::Value;

use crate::api::{ApiResponse, ApiResult};

pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(10 * 60);

const KEY_MAX: usize = 128;

#[derive(Debug, Clone)]
struct CachedResponse {
    stored_at: Instant,
    status: Status,
    data: Value,
    meta: Option<Value>,
}

/// First successful response per `Idempotency-Key`, replayed on retries.
/// Lives in memory only.
pub struct IdempotencyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        IdempotencyCache::new(IDEMPOTENCY_TTL)
    }
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        IdempotencyCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<ApiResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        entries.retain(|_, e| now.duration_since(e.stored_at) < self.ttl);
        entries
            .get(key)
            .map(|e| ApiResponse::replay(e.status, e.data.clone(), e.meta.clone()))
    }

    pub fn store(&self, key: &str, response: &ApiResponse) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(
            key.to_string(),
            CachedResponse {
                stored_at: Instant::now(),
                status: response.status(),
                data: response.data().clone(),
                meta: response.meta_value().cloned(),
            },
        );
    }

    /// Replay a cached response for `key`, or run `op` and remember its
    /// success. Errors are never cached so a retry can succeed.
    pub fn run(&self, key: Option<&IdempotencyKey>, op: impl FnOnce() -> ApiResult) -> ApiResult {
        let key = match key {
            Some(k) => k,
            None => return op(),
        };
        if let Some(replayed) = self.lookup(&key.0) {
            return Ok(replayed);
        }
        let response = op()?;
        self.store(&key.0, &response);
        Ok(response)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// `Idempotency-Key` header scoped to the method and path it was sent
/// with, so one client key cannot replay across endpoints.
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for IdempotencyKey {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let raw = request
            .headers()
            .get_one("Idempotency-Key")
            .map(str::trim)
            .filter(|k| !k.is_empty() && k.len() <= KEY_MAX);
        match raw {
            Some(k) => Outcome::Success(IdempotencyKey(format!(
                "{} {} {}",
                request.method(),
                request.uri().path(),
                k
            ))),
            None => Outcome::Forward(Status::Ok),
        }
    }
}

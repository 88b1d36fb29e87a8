use log::error;
use md5::{Digest, Md5};
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::validation::FieldError;

// ── Request ids ─────────────────────────────────────────

/// Per-request correlation id, cached on the request by the headers
/// fairing and echoed in every envelope.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn request_id(req: &Request<'_>) -> String {
    req.local_cache(|| {
        let incoming = req
            .headers()
            .get_one("X-Request-Id")
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 64 && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        RequestId(
            incoming
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        )
    })
    .0
    .clone()
}

/// Set by request guards so catchers can explain why a guard refused.
#[derive(Debug, Clone, Copy)]
pub struct GuardFailure {
    pub code: &'static str,
    pub message: &'static str,
}

impl GuardFailure {
    pub fn new(code: &'static str, message: &'static str) -> Self {
        GuardFailure { code, message }
    }
}

// ── ETags ───────────────────────────────────────────────

/// Weak validator over the serialized payload: `W/"<md5 hex>"`.
pub fn etag(value: &Value) -> String {
    let mut hasher = Md5::new();
    hasher.update(value.to_string().as_bytes());
    format!("W/\"{}\"", hex::encode(hasher.finalize()))
}

/// Raw `If-None-Match` header, if any.
pub struct IfNoneMatch(pub Option<String>);

impl IfNoneMatch {
    pub fn matches(&self, etag: &str) -> bool {
        self.0
            .as_deref()
            .map(|v| v.split(',').any(|t| t.trim() == etag || t.trim() == "*"))
            .unwrap_or(false)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for IfNoneMatch {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(IfNoneMatch(
            request.headers().get_one("If-None-Match").map(str::to_string),
        ))
    }
}

// ── Success envelope ────────────────────────────────────

pub struct ApiResponse {
    status: Status,
    data: Value,
    meta: Option<Value>,
    headers: Vec<Header<'static>>,
}

impl ApiResponse {
    pub fn with_status(status: Status, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or_else(|e| {
            error!("Failed to serialize response body: {}", e);
            Value::Null
        });
        ApiResponse {
            status,
            data,
            meta: None,
            headers: Vec::new(),
        }
    }

    pub fn ok(data: impl Serialize) -> Self {
        ApiResponse::with_status(Status::Ok, data)
    }

    pub fn created(data: impl Serialize) -> Self {
        ApiResponse::with_status(Status::Created, data)
    }

    /// Bodyless 304 for a matching `If-None-Match`.
    pub fn not_modified(etag: String) -> Self {
        ApiResponse {
            status: Status::NotModified,
            data: Value::Null,
            meta: None,
            headers: vec![Header::new("ETag", etag)],
        }
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value.into()));
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Rebuild a response from a cached status and body.
    pub fn replay(status: Status, data: Value, meta: Option<Value>) -> Self {
        ApiResponse {
            status,
            data,
            meta,
            headers: vec![Header::new("Idempotent-Replayed", "true")],
        }
    }

    pub fn meta_value(&self) -> Option<&Value> {
        self.meta.as_ref()
    }
}

impl<'r> Responder<'r, 'static> for ApiResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        if self.status == Status::NotModified {
            let mut resp = Response::build().status(Status::NotModified).finalize();
            for h in self.headers {
                resp.set_header(h);
            }
            return Ok(resp);
        }

        let mut body = json!({
            "success": true,
            "data": self.data,
            "requestId": request_id(req),
        });
        if let Some(meta) = self.meta {
            body["meta"] = meta;
        }
        let mut resp = Json(body).respond_to(req)?;
        resp.set_status(self.status);
        for h in self.headers {
            resp.set_header(h);
        }
        Ok(resp)
    }
}

// ── Error envelope ──────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    pub status: Status,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

pub type ApiResult = Result<ApiResponse, ApiError>;

impl ApiError {
    pub fn new(status: Status, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(Status::BadRequest, "BAD_REQUEST", message)
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        let details = serde_json::to_value(&errors).unwrap_or(Value::Null);
        ApiError::new(Status::BadRequest, "VALIDATION_ERROR", "Validation failed").details(details)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(Status::Unauthorized, "UNAUTHORIZED", message)
    }

    pub fn read_only() -> Self {
        ApiError::new(
            Status::Forbidden,
            "READ_ONLY",
            "Write operations are disabled in this environment",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(Status::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::new(Status::Conflict, "CONFLICT", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::new(Status::ServiceUnavailable, "SERVICE_UNAVAILABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(Status::InternalServerError, "INTERNAL_ERROR", message)
    }

    pub fn body(&self, request_id: String) -> Value {
        json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            },
            "requestId": request_id,
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ReadOnly => ApiError::read_only(),
            StoreError::Validation(msg) => {
                ApiError::new(Status::BadRequest, "VALIDATION_ERROR", msg)
            }
            StoreError::NotFound => ApiError::not_found("Project not found"),
            other => {
                error!("Storage failure: {}", other);
                ApiError::internal("Storage failure")
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let body = self.body(request_id(req));
        let mut resp = Json(body).respond_to(req)?;
        resp.set_status(self.status);
        Ok(resp)
    }
}

/// Error envelope used by the catchers for a bare status.
pub fn status_error(status: Status, req: &Request<'_>) -> ApiError {
    if let Some(failure) = req.local_cache(|| None::<GuardFailure>) {
        return ApiError::new(status, failure.code, failure.message);
    }
    let (code, message) = match status.code {
        400 => ("BAD_REQUEST", "Bad request"),
        401 => ("UNAUTHORIZED", "Unauthorized"),
        403 => ("FORBIDDEN", "Forbidden"),
        404 => ("NOT_FOUND", "Not found"),
        413 => ("PAYLOAD_TOO_LARGE", "Payload too large"),
        415 => ("UNSUPPORTED_MEDIA_TYPE", "Unsupported media type"),
        422 => ("VALIDATION_ERROR", "Unprocessable request body"),
        429 => ("RATE_LIMITED", "Too many requests"),
        503 => ("SERVICE_UNAVAILABLE", "Service unavailable"),
        _ => ("INTERNAL_ERROR", "Internal server error"),
    };
    ApiError::new(status, code, message)
}

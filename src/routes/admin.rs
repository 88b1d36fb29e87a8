use std::sync::Arc;

use chrono::Utc;
use log::error;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::record;
use crate::api::{ApiError, ApiResponse, ApiResult};
use crate::metrics::MetricsCache;
use crate::models::activity::{ActivityAction, ActivityEntry};
use crate::security::auth::{AdminSession, SameOrigin};
use crate::store::Store;

// ── Activity log ────────────────────────────────────────

#[get("/activity")]
pub fn activity_list(_session: AdminSession, store: &State<Arc<dyn Store>>) -> ApiResult {
    Ok(ApiResponse::ok(store.activity_list()))
}

#[delete("/activity")]
pub fn activity_clear(
    _origin: SameOrigin,
    session: AdminSession,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    store.activity_clear()?;
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Clear, "activity", &session.username),
    );
    Ok(ApiResponse::ok(json!({ "message": "Activity log cleared" })))
}

// ── Metrics and site config ─────────────────────────────

#[get("/metrics")]
pub fn metrics(store: &State<Arc<dyn Store>>, cache: &State<MetricsCache>) -> ApiResult {
    Ok(ApiResponse::ok(cache.get(store.inner().as_ref())))
}

fn update_config(
    patch: &Value,
    username: &str,
    store: &dyn Store,
    cache: &MetricsCache,
) -> ApiResult {
    if !patch.is_object() {
        return Err(ApiError::bad_request("Configuration update must be an object"));
    }
    let config = store.config_update(patch)?;
    cache.invalidate();
    let sections: Vec<&String> = patch.as_object().map(|m| m.keys().collect()).unwrap_or_default();
    record(
        store,
        ActivityEntry::new(ActivityAction::Config, "config", username)
            .with_details(json!({ "sections": sections })),
    );
    Ok(ApiResponse::ok(json!({ "config": config })))
}

#[post("/metrics", data = "<body>")]
pub fn metrics_update(
    session: AdminSession,
    body: Json<Value>,
    store: &State<Arc<dyn Store>>,
    cache: &State<MetricsCache>,
) -> ApiResult {
    update_config(&body, &session.username, store.inner().as_ref(), cache)
}

#[get("/config")]
pub fn config_get(store: &State<Arc<dyn Store>>) -> ApiResult {
    Ok(ApiResponse::ok(store.config_get()))
}

#[put("/config", data = "<body>")]
pub fn config_update(
    _origin: SameOrigin,
    session: AdminSession,
    body: Json<Value>,
    store: &State<Arc<dyn Store>>,
    cache: &State<MetricsCache>,
) -> ApiResult {
    update_config(&body, &session.username, store.inner().as_ref(), cache)
}

// ── Backup ──────────────────────────────────────────────

#[get("/backup")]
pub fn backup(session: AdminSession, store: &State<Arc<dyn Store>>) -> ApiResult {
    let projects = store.snapshot().map_err(|e| {
        error!("Backup error: {}", e);
        ApiError::internal("Failed to generate backup")
    })?;
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Backup, "backup", &session.username),
    );
    let stamp = Utc::now();
    Ok(ApiResponse::ok(json!({
        "generatedAt": stamp.to_rfc3339(),
        "projects": projects,
        "config": store.config_get(),
    }))
    .header(
        "Content-Disposition",
        format!(
            "attachment; filename=\"chartfolio-backup-{}.json\"",
            stamp.format("%Y%m%d-%H%M%S")
        ),
    ))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        activity_list,
        activity_clear,
        metrics,
        metrics_update,
        config_get,
        config_update,
        backup
    ]
}

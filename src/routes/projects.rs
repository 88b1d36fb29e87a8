use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::record;
use crate::api::{etag, ApiError, ApiResponse, ApiResult, IfNoneMatch};
use crate::idempotency::{IdempotencyCache, IdempotencyKey};
use crate::metrics::MetricsCache;
use crate::models::activity::{ActivityAction, ActivityEntry};
use crate::models::project::{OrderUpdate, Project, ProjectStatus};
use crate::security::auth::{AdminSession, SameOrigin};
use crate::store::Store;
use crate::validation::{self, ProjectQuery, RawProjectQuery, SortOrder};

const RESOURCE: &str = "project";

fn check_id(id: &str) -> Result<(), ApiError> {
    if validation::is_valid_project_id(id) {
        Ok(())
    } else {
        Err(ApiError::new(
            rocket::http::Status::BadRequest,
            "VALIDATION_ERROR",
            "Invalid project ID format",
        ))
    }
}

// ── Listing ─────────────────────────────────────────────

fn matches_query(p: &Project, q: &ProjectQuery, is_admin: bool) -> bool {
    if !is_admin && p.status != ProjectStatus::Published {
        return false;
    }
    if let Some(status) = q.status {
        if p.status != status {
            return false;
        }
    }
    if let Some(tech) = q.tech.as_deref() {
        let tech = tech.to_lowercase();
        let tool_hit = p.tool.as_str().to_lowercase() == tech;
        let tag_hit = p.tags.iter().any(|t| t.to_lowercase() == tech);
        if !tool_hit && !tag_hit {
            return false;
        }
    }
    if let Some(search) = q.search.as_deref() {
        let needle = search.to_lowercase();
        let hit = p.title.to_lowercase().contains(&needle)
            || p.description.to_lowercase().contains(&needle)
            || p.tags.iter().any(|t| t.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    true
}

/// Filter, sort, and paginate. Returns the page and the filtered total.
pub fn apply_query(projects: Vec<Project>, q: &ProjectQuery, is_admin: bool) -> (Vec<Project>, usize) {
    let mut filtered: Vec<Project> = projects
        .into_iter()
        .filter(|p| !p.is_deleted() && matches_query(p, q, is_admin))
        .collect();
    match q.sort {
        SortOrder::DateDesc => filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::DateAsc => filtered.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortOrder::TitleAsc => {
            filtered.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        }
    }
    let total = filtered.len();
    let page = filtered
        .into_iter()
        .skip((q.page - 1).saturating_mul(q.limit))
        .take(q.limit)
        .collect();
    (page, total)
}

#[get("/projects?<query..>")]
pub fn list(
    query: RawProjectQuery,
    session: Option<AdminSession>,
    if_none_match: IfNoneMatch,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    let q = ProjectQuery::parse(&query).map_err(ApiError::validation)?;
    let is_admin = session.is_some();
    let (page, total) = apply_query(store.project_list(false), &q, is_admin);

    let data = serde_json::to_value(&page).map_err(|_| ApiError::internal("Failed to fetch projects"))?;
    let tag = etag(&data);
    if if_none_match.matches(&tag) {
        return Ok(ApiResponse::not_modified(tag));
    }

    let total_pages = (total + q.limit - 1) / q.limit;
    let cache = if is_admin {
        "private, no-store"
    } else {
        "public, s-maxage=60, stale-while-revalidate=300"
    };
    Ok(ApiResponse::ok(data)
        .meta(json!({
            "page": q.page,
            "limit": q.limit,
            "total": total,
            "totalPages": total_pages,
        }))
        .header("ETag", tag)
        .header("Cache-Control", cache)
        .header("Vary", "Cookie"))
}

#[post("/projects", data = "<body>")]
pub fn create(
    _origin: SameOrigin,
    session: AdminSession,
    key: Option<IdempotencyKey>,
    body: Json<Value>,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
    idempotency: &State<IdempotencyCache>,
) -> ApiResult {
    idempotency.run(key.as_ref(), || {
        let draft = validation::validate_create(&body).map_err(ApiError::validation)?;
        let project = store.project_create(draft)?;
        metrics.invalidate();
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Create, RESOURCE, &session.username)
                .on(&project.id)
                .with_details(json!({ "title": project.title })),
        );
        Ok(ApiResponse::created(project))
    })
}

#[get("/projects/trash")]
pub fn trash(_session: AdminSession, store: &State<Arc<dyn Store>>) -> ApiResult {
    Ok(ApiResponse::ok(store.project_list_deleted()))
}

/// Accepts `order` as a number or a numeric string; drops anything else.
fn parse_order_updates(body: &Value) -> Result<Vec<OrderUpdate>, ApiError> {
    let items = body
        .as_array()
        .ok_or_else(|| ApiError::bad_request("Invalid body: expected array"))?;
    let updates: Vec<OrderUpdate> = items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?.trim();
            if id.is_empty() {
                return None;
            }
            let order = match item.get("order")? {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
                Value::String(s) => s.trim().parse::<i64>().ok()?,
                _ => return None,
            };
            Some(OrderUpdate {
                id: id.to_string(),
                order,
            })
        })
        .collect();
    if updates.is_empty() {
        return Err(ApiError::bad_request("No valid items to reorder"));
    }
    Ok(updates)
}

#[put("/projects/reorder", data = "<body>")]
pub fn reorder(
    _origin: SameOrigin,
    session: AdminSession,
    body: Json<Value>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    let updates = parse_order_updates(&body)?;
    let changed = store.project_reorder(&updates)?;
    if changed > 0 {
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Reorder, RESOURCE, &session.username)
                .with_details(json!({ "count": changed })),
        );
    }
    Ok(ApiResponse::ok(json!({ "count": updates.len(), "changed": changed })))
}

// ── Single project ──────────────────────────────────────

#[get("/projects/<id>")]
pub fn show(id: &str, session: Option<AdminSession>, store: &State<Arc<dyn Store>>) -> ApiResult {
    check_id(id)?;
    let project = store
        .project_get(id)
        .filter(|p| !p.is_deleted())
        .filter(|p| session.is_some() || p.is_published())
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    Ok(ApiResponse::ok(project)
        .header("Cache-Control", "public, s-maxage=60, stale-while-revalidate=300"))
}

#[put("/projects/<id>", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn update(
    id: &str,
    _origin: SameOrigin,
    session: AdminSession,
    key: Option<IdempotencyKey>,
    body: Json<Value>,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
    idempotency: &State<IdempotencyCache>,
) -> ApiResult {
    check_id(id)?;
    idempotency.run(key.as_ref(), || {
        let patch = validation::validate_patch(&body).map_err(ApiError::validation)?;
        let project = store.project_update(id, patch)?;
        metrics.invalidate();
        let fields: Vec<&String> = project
            .history
            .first()
            .map(|h| h.changes.keys().collect())
            .unwrap_or_default();
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Update, RESOURCE, &session.username)
                .on(&project.id)
                .with_details(json!({ "title": project.title, "fields": fields })),
        );
        Ok(ApiResponse::ok(project))
    })
}

#[delete("/projects/<id>?<permanent>")]
pub fn remove(
    id: &str,
    permanent: Option<bool>,
    _origin: SameOrigin,
    session: AdminSession,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
) -> ApiResult {
    check_id(id)?;
    if permanent.unwrap_or(false) {
        let report = store.project_purge(id)?;
        metrics.invalidate();
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Purge, RESOURCE, &session.username)
                .on(id)
                .with_details(json!({ "removedFiles": report.removed_files })),
        );
        return Ok(ApiResponse::ok(json!({
            "message": "Project permanently deleted",
            "removedFiles": report.removed_files,
            "keptFiles": report.kept_files,
        })));
    }

    let project = store.project_soft_delete(id)?;
    metrics.invalidate();
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Delete, RESOURCE, &session.username)
            .on(id)
            .with_details(json!({ "title": project.title })),
    );
    Ok(ApiResponse::ok(json!({ "message": "Project deleted", "project": project })))
}

#[post("/projects/<id>/restore")]
pub fn restore(
    id: &str,
    _origin: SameOrigin,
    session: AdminSession,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
) -> ApiResult {
    check_id(id)?;
    let project = store.project_restore(id)?;
    metrics.invalidate();
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Restore, RESOURCE, &session.username)
            .on(id)
            .with_details(json!({ "title": project.title })),
    );
    Ok(ApiResponse::ok(project))
}

#[post("/projects/<id>/duplicate")]
pub fn duplicate(
    id: &str,
    _origin: SameOrigin,
    session: AdminSession,
    key: Option<IdempotencyKey>,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
    idempotency: &State<IdempotencyCache>,
) -> ApiResult {
    check_id(id)?;
    idempotency.run(key.as_ref(), || {
        let copy = store.project_duplicate(id)?;
        metrics.invalidate();
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Duplicate, RESOURCE, &session.username)
                .on(&copy.id)
                .with_details(json!({ "sourceId": id, "title": copy.title })),
        );
        Ok(ApiResponse::created(copy))
    })
}

#[get("/projects/<id>/history")]
pub fn history(id: &str, _session: AdminSession, store: &State<Arc<dyn Store>>) -> ApiResult {
    check_id(id)?;
    let project = store
        .project_get(id)
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    Ok(ApiResponse::ok(project.history))
}

#[post("/projects/<id>/rollback/<history_id>")]
pub fn rollback(
    id: &str,
    history_id: &str,
    _origin: SameOrigin,
    session: AdminSession,
    store: &State<Arc<dyn Store>>,
    metrics: &State<MetricsCache>,
) -> ApiResult {
    check_id(id)?;
    let exists = store
        .project_get(id)
        .filter(|p| !p.is_deleted())
        .ok_or_else(|| ApiError::not_found("Project not found"))?
        .history
        .iter()
        .any(|h| h.id == history_id);
    if !exists {
        return Err(ApiError::not_found("History entry not found"));
    }
    let project = store.project_rollback(id, history_id)?;
    metrics.invalidate();
    record(
        store.inner().as_ref(),
        ActivityEntry::new(ActivityAction::Rollback, RESOURCE, &session.username)
            .on(id)
            .with_details(json!({ "historyId": history_id })),
    );
    Ok(ApiResponse::ok(project))
}

#[get("/tags")]
pub fn tags(store: &State<Arc<dyn Store>>) -> ApiResult {
    Ok(ApiResponse::ok(store.project_tags(true)))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        list, create, trash, reorder, show, update, remove, restore, duplicate, history, rollback,
        tags
    ]
}

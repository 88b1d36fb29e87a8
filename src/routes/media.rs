use std::sync::Arc;

use log::error;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::record;
use crate::api::{ApiError, ApiResponse, ApiResult};
use crate::config::AppConfig;
use crate::models::activity::{ActivityAction, ActivityEntry};
use crate::security::auth::{AdminSession, SameOrigin};
use crate::store::Store;
use crate::uploads::{self, UploadCategory, MAX_TOTAL_SIZE, MB};

// ── Upload ──────────────────────────────────────────────

#[derive(FromForm)]
pub struct UploadForm<'r> {
    pub files: Vec<TempFile<'r>>,
}

#[post("/upload", format = "multipart/form-data", data = "<form>")]
pub async fn upload(
    _origin: SameOrigin,
    session: AdminSession,
    mut form: Form<UploadForm<'_>>,
    config: &State<AppConfig>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    if !config.can_write() {
        return Err(ApiError::read_only());
    }
    let uploads_dir = config.uploads_dir();
    uploads::ensure_dirs(&uploads_dir).map_err(|e| {
        error!("Failed to create upload directories: {}", e);
        ApiError::internal("Upload failed. Please try again.")
    })?;

    let mut saved: Vec<(UploadCategory, String)> = Vec::new();
    let mut errors: Vec<Value> = Vec::new();

    let total: u64 = form.files.iter().map(|f| f.len()).sum();
    if total > MAX_TOTAL_SIZE {
        errors.push(json!({
            "file": "total",
            "error": format!("Total upload size exceeds {}MB limit", MAX_TOTAL_SIZE / MB),
        }));
    } else {
        for file in form.files.iter_mut().filter(|f| f.len() > 0) {
            match uploads::save(&uploads_dir, file).await {
                Ok(s) => saved.push((s.category, s.path)),
                Err(e) => errors.push(json!({ "file": uploads::original_name(file), "error": e })),
            }
        }
    }

    if saved.is_empty() && !errors.is_empty() {
        return Err(ApiError::new(Status::BadRequest, "UPLOAD_ERROR", "All uploads failed")
            .details(json!({ "errors": errors })));
    }

    let paths = |c: UploadCategory| -> Vec<&str> {
        saved
            .iter()
            .filter(|(cat, _)| *cat == c)
            .map(|(_, p)| p.as_str())
            .collect()
    };
    let message = if errors.is_empty() {
        format!("Successfully uploaded {} file(s)", saved.len())
    } else {
        format!("Uploaded {} file(s) with {} error(s)", saved.len(), errors.len())
    };
    let mut data = json!({
        "images": paths(UploadCategory::Images),
        "videos": paths(UploadCategory::Videos),
        "pdfs": paths(UploadCategory::Pdfs),
        "documents": paths(UploadCategory::Documents),
        "message": message,
    });
    if !errors.is_empty() {
        data["errors"] = Value::Array(errors);
    }

    if !saved.is_empty() {
        record(
            store.inner().as_ref(),
            ActivityEntry::new(ActivityAction::Upload, "media", &session.username)
                .with_details(json!({ "count": saved.len() })),
        );
    }
    Ok(ApiResponse::ok(data))
}

/// Any other content type on the upload endpoint.
#[post("/upload", rank = 2)]
pub fn upload_wrong_type(_origin: SameOrigin, _session: AdminSession) -> ApiError {
    ApiError::bad_request("Content-Type must be multipart/form-data")
}

// ── Media library ───────────────────────────────────────

#[get("/media")]
pub fn list(
    _session: AdminSession,
    config: &State<AppConfig>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    let files = uploads::list_media(&config.public_dir).map_err(|e| {
        error!("Media fetch error: {}", e);
        ApiError::internal("Failed to fetch media")
    })?;
    let usage = store.media_usage();
    let enriched: Vec<Value> = files
        .into_iter()
        .map(|f| {
            let used_by = usage.get(&f.path).cloned().unwrap_or_default();
            let mut item = serde_json::to_value(&f).unwrap_or(Value::Null);
            item["isUsed"] = json!(!used_by.is_empty());
            item["usage"] = json!(used_by);
            item
        })
        .collect();
    Ok(ApiResponse::ok(enriched))
}

#[delete("/media", data = "<body>")]
pub fn delete(
    _origin: SameOrigin,
    session: AdminSession,
    body: Json<Value>,
    config: &State<AppConfig>,
    store: &State<Arc<dyn Store>>,
) -> ApiResult {
    if !config.can_write() {
        return Err(ApiError::read_only());
    }
    let path = body
        .get("filePath")
        .and_then(Value::as_str)
        .filter(|p| p.starts_with("/uploads/") && !p.contains(".."))
        .ok_or_else(|| ApiError::bad_request("Invalid file path"))?;

    let used_by = store.media_usage().remove(path).unwrap_or_default();
    if !used_by.is_empty() {
        return Err(ApiError::conflict(format!(
            "Cannot delete: Used in {} projects",
            used_by.len()
        ))
        .details(json!({ "usedBy": used_by })));
    }

    match uploads::delete_upload(&config.public_dir, path) {
        Ok(true) => {
            record(
                store.inner().as_ref(),
                ActivityEntry::new(ActivityAction::MediaDelete, "media", &session.username)
                    .on(path),
            );
            Ok(ApiResponse::ok(json!({ "message": "File deleted", "path": path })))
        }
        Ok(false) => Err(ApiError::not_found("File not found")),
        Err(e) => {
            error!("Delete error: {}", e);
            Err(ApiError::internal("Failed to delete file"))
        }
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![upload, upload_wrong_type, list, delete]
}

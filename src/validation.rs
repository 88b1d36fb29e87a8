use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::models::project::{ProjectDraft, ProjectPatch, ProjectStatus, Tool};
use crate::models::site_config::SiteConfig;

pub const TITLE_MAX: usize = 100;
pub const DESCRIPTION_MIN: usize = 10;
pub const TAGS_MAX: usize = 20;
pub const TAG_LEN_MAX: usize = 50;
pub const IMAGES_MAX: usize = 50;
pub const DOCUMENTS_MAX: usize = 20;
pub const META_LEN_MAX: usize = 300;

const UPLOAD_PREFIXES: &[&str] = &[
    "/uploads/images/",
    "/uploads/videos/",
    "/uploads/pdfs/",
    "/uploads/documents/",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ── Primitive checks ───────────────────────────────────

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"))
}

fn uuid_v4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("valid regex")
    })
}

/// `/uploads/{images,videos,pdfs,documents}/<name>` with a plain file name.
pub fn is_valid_upload_path(path: &str) -> bool {
    if !UPLOAD_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return false;
    }
    if path.contains("..") || path.contains("//") {
        return false;
    }
    match path.rsplit('/').next() {
        Some(name) => filename_re().is_match(name),
        None => false,
    }
}

/// Project ids are UUID v4, or the fixed ids of the bundled samples.
pub fn is_valid_project_id(id: &str) -> bool {
    uuid_v4_re().is_match(id) || id.starts_with("sample-")
}

/// Single-line text: control characters removed, whitespace collapsed.
pub fn sanitize_line(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Multi-line text: trimmed, control characters other than line breaks
/// and tabs removed.
pub fn sanitize_block(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

fn check_title(v: &Value) -> Result<String, String> {
    let raw = v.as_str().ok_or("Title must be a string")?;
    let title = sanitize_line(raw);
    let len = title.chars().count();
    if len == 0 {
        return Err("Title is required".into());
    }
    if len > TITLE_MAX {
        return Err(format!("Title must be at most {} characters", TITLE_MAX));
    }
    Ok(title)
}

fn check_description(v: &Value) -> Result<String, String> {
    let raw = v.as_str().ok_or("Description must be a string")?;
    let description = sanitize_block(raw);
    if description.chars().count() < DESCRIPTION_MIN {
        return Err("Description is too short".into());
    }
    Ok(description)
}

fn check_tool(v: &Value) -> Result<Tool, String> {
    v.as_str()
        .and_then(Tool::parse)
        .ok_or_else(|| "Tool must be one of: Power BI, Tableau, Excel".to_string())
}

fn check_status(v: &Value) -> Result<ProjectStatus, String> {
    v.as_str()
        .and_then(ProjectStatus::parse)
        .ok_or_else(|| "Status must be draft, published or archived".to_string())
}

fn check_order(v: &Value) -> Result<i64, String> {
    v.as_i64().ok_or_else(|| "Order must be an integer".to_string())
}

/// Short string lists (tags, keywords): entries sanitized, empties dropped.
fn check_labels(v: &Value, label: &str) -> Result<Vec<String>, String> {
    let items = v.as_array().ok_or_else(|| format!("{} must be an array", label))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must contain only strings", label))?;
        let s = sanitize_line(s);
        if s.is_empty() {
            continue;
        }
        if s.chars().count() > TAG_LEN_MAX {
            return Err(format!("Each entry in {} must be at most {} characters", label, TAG_LEN_MAX));
        }
        out.push(s);
    }
    if out.len() > TAGS_MAX {
        return Err(format!("{} may contain at most {} entries", label, TAGS_MAX));
    }
    Ok(out)
}

fn check_paths(v: &Value, label: &str, max: usize) -> Result<Vec<String>, String> {
    let items = v.as_array().ok_or_else(|| format!("{} must be an array", label))?;
    if items.len() > max {
        return Err(format!("{} may contain at most {} entries", label, max));
    }
    items
        .iter()
        .map(|item| match item.as_str() {
            Some(p) if is_valid_upload_path(p) => Ok(p.to_string()),
            _ => Err(format!("{} contains an invalid upload path", label)),
        })
        .collect()
}

fn check_path(v: &Value, label: &str) -> Result<Option<String>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) if is_valid_upload_path(s) => Ok(Some(s.clone())),
        _ => Err(format!("Invalid {} path", label)),
    }
}

fn check_embed_url(v: &Value) -> Result<String, String> {
    let raw = match v {
        Value::Null => return Ok(String::new()),
        Value::String(s) => s.trim(),
        _ => return Err("Embed URL must be a string".into()),
    };
    if raw.is_empty() {
        return Ok(String::new());
    }
    match url::Url::parse(raw) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(raw.to_string()),
        _ => Err("Embed URL must be an http(s) URL".into()),
    }
}

fn check_meta(v: &Value, label: &str) -> Result<Option<String>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = sanitize_line(s);
            if s.chars().count() > META_LEN_MAX {
                return Err(format!("{} must be at most {} characters", label, META_LEN_MAX));
            }
            Ok(if s.is_empty() { None } else { Some(s) })
        }
        _ => Err(format!("{} must be a string", label)),
    }
}

fn check_publish_at(v: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| "publishAt must be an RFC 3339 date-time".to_string()),
        _ => Err("publishAt must be a string".into()),
    }
}

// ── Project bodies ─────────────────────────────────────

/// Runs `check` on `obj[key]` when present, collecting failures.
fn field<T>(
    obj: &Map<String, Value>,
    key: &str,
    errors: &mut Vec<FieldError>,
    check: impl FnOnce(&Value) -> Result<T, String>,
) -> Option<T> {
    let v = obj.get(key)?;
    match check(v) {
        Ok(t) => Some(t),
        Err(msg) => {
            errors.push(FieldError::new(key, msg));
            None
        }
    }
}

fn as_object(body: &Value) -> Result<&Map<String, Value>, Vec<FieldError>> {
    body.as_object()
        .ok_or_else(|| vec![FieldError::new("body", "Expected a JSON object")])
}

/// Validate a create body. Unknown keys (including `id`, `createdAt`,
/// `updatedAt`) are ignored.
pub fn validate_create(body: &Value) -> Result<ProjectDraft, Vec<FieldError>> {
    let obj = as_object(body)?;
    let mut errors = Vec::new();

    let title = field(obj, "title", &mut errors, check_title);
    if !obj.contains_key("title") {
        errors.push(FieldError::new("title", "Title is required"));
    }
    let description = field(obj, "description", &mut errors, check_description);
    if !obj.contains_key("description") {
        errors.push(FieldError::new("description", "Description is too short"));
    }
    let tool = field(obj, "tool", &mut errors, check_tool);
    if !obj.contains_key("tool") {
        errors.push(FieldError::new("tool", "Tool must be one of: Power BI, Tableau, Excel"));
    }

    let draft = ProjectDraft {
        title: title.unwrap_or_default(),
        description: description.unwrap_or_default(),
        tool,
        tags: field(obj, "tags", &mut errors, |v| check_labels(v, "Tags")).unwrap_or_default(),
        status: field(obj, "status", &mut errors, check_status).unwrap_or_default(),
        order: field(obj, "order", &mut errors, check_order),
        images: field(obj, "images", &mut errors, |v| check_paths(v, "Images", IMAGES_MAX))
            .unwrap_or_default(),
        video: field(obj, "video", &mut errors, |v| check_path(v, "video")).flatten(),
        pdf: field(obj, "pdf", &mut errors, |v| check_path(v, "PDF")).flatten(),
        thumbnail: field(obj, "thumbnail", &mut errors, |v| check_path(v, "thumbnail")).flatten(),
        documents: field(obj, "documents", &mut errors, |v| {
            check_paths(v, "Documents", DOCUMENTS_MAX)
        })
        .unwrap_or_default(),
        embed_url: field(obj, "embedUrl", &mut errors, check_embed_url).unwrap_or_default(),
        meta_title: field(obj, "metaTitle", &mut errors, |v| check_meta(v, "metaTitle")).flatten(),
        meta_description: field(obj, "metaDescription", &mut errors, |v| {
            check_meta(v, "metaDescription")
        })
        .flatten(),
        keywords: field(obj, "keywords", &mut errors, |v| check_labels(v, "Keywords"))
            .unwrap_or_default(),
        publish_at: field(obj, "publishAt", &mut errors, check_publish_at).flatten(),
    };

    if errors.is_empty() {
        Ok(draft)
    } else {
        Err(errors)
    }
}

/// Validate a partial update. Absent keys stay untouched; `null` clears
/// the nullable single-value fields.
pub fn validate_patch(body: &Value) -> Result<ProjectPatch, Vec<FieldError>> {
    let obj = as_object(body)?;
    let mut errors = Vec::new();

    let patch = ProjectPatch {
        title: field(obj, "title", &mut errors, check_title),
        description: field(obj, "description", &mut errors, check_description),
        tool: field(obj, "tool", &mut errors, check_tool),
        tags: field(obj, "tags", &mut errors, |v| check_labels(v, "Tags")),
        status: field(obj, "status", &mut errors, check_status),
        order: field(obj, "order", &mut errors, check_order),
        images: field(obj, "images", &mut errors, |v| check_paths(v, "Images", IMAGES_MAX)),
        video: field(obj, "video", &mut errors, |v| check_path(v, "video")),
        pdf: field(obj, "pdf", &mut errors, |v| check_path(v, "PDF")),
        thumbnail: field(obj, "thumbnail", &mut errors, |v| check_path(v, "thumbnail")),
        documents: field(obj, "documents", &mut errors, |v| {
            check_paths(v, "Documents", DOCUMENTS_MAX)
        }),
        embed_url: field(obj, "embedUrl", &mut errors, check_embed_url),
        meta_title: field(obj, "metaTitle", &mut errors, |v| check_meta(v, "metaTitle")),
        meta_description: field(obj, "metaDescription", &mut errors, |v| {
            check_meta(v, "metaDescription")
        }),
        keywords: field(obj, "keywords", &mut errors, |v| check_labels(v, "Keywords")),
        publish_at: field(obj, "publishAt", &mut errors, check_publish_at),
    };

    if errors.is_empty() {
        Ok(patch)
    } else {
        Err(errors)
    }
}

// ── Listing query ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
    TitleAsc,
}

/// Raw query-string values for `GET /api/projects`.
#[derive(Debug, Default, FromForm)]
pub struct RawProjectQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub status: Option<String>,
    pub tech: Option<String>,
    pub sort: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectQuery {
    pub limit: usize,
    pub page: usize,
    pub status: Option<ProjectStatus>,
    pub tech: Option<String>,
    pub sort: SortOrder,
    pub search: Option<String>,
}

impl Default for ProjectQuery {
    fn default() -> Self {
        ProjectQuery {
            limit: 10,
            page: 1,
            status: None,
            tech: None,
            sort: SortOrder::DateDesc,
            search: None,
        }
    }
}

impl ProjectQuery {
    pub fn parse(raw: &RawProjectQuery) -> Result<Self, Vec<FieldError>> {
        let mut q = ProjectQuery::default();
        let mut errors = Vec::new();

        if let Some(v) = raw.limit.as_deref() {
            match v.trim().parse::<usize>() {
                Ok(n) if (1..=100).contains(&n) => q.limit = n,
                _ => errors.push(FieldError::new("limit", "limit must be between 1 and 100")),
            }
        }
        if let Some(v) = raw.page.as_deref() {
            match v.trim().parse::<usize>() {
                Ok(n) if n >= 1 => q.page = n,
                _ => errors.push(FieldError::new("page", "page must be 1 or greater")),
            }
        }
        if let Some(v) = raw.status.as_deref() {
            match ProjectStatus::parse(v) {
                Some(s) => q.status = Some(s),
                None => errors.push(FieldError::new("status", "Status must be draft, published or archived")),
            }
        }
        if let Some(v) = raw.sort.as_deref() {
            q.sort = match v {
                "date-desc" => SortOrder::DateDesc,
                "date-asc" => SortOrder::DateAsc,
                "title-asc" => SortOrder::TitleAsc,
                _ => {
                    errors.push(FieldError::new("sort", "sort must be date-desc, date-asc or title-asc"));
                    SortOrder::DateDesc
                }
            };
        }
        q.tech = raw.tech.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        q.search = raw.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        if errors.is_empty() {
            Ok(q)
        } else {
            Err(errors)
        }
    }
}

// ── Site config ────────────────────────────────────────

pub fn validate_config(cfg: &SiteConfig) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    if cfg.profile.name.trim().is_empty() {
        errors.push(FieldError::new("profile.name", "Name is required"));
    }
    if cfg.profile.role.trim().is_empty() {
        errors.push(FieldError::new("profile.role", "Role is required"));
    }
    let email = cfg.profile.email.trim();
    let email_ok = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(' '),
        None => false,
    };
    if !email_ok {
        errors.push(FieldError::new("profile.email", "Invalid email address"));
    }
    if cfg.hero.headline.trim().is_empty() {
        errors.push(FieldError::new("hero.headline", "Headline is required"));
    }
    for (i, skill) in cfg.skills.iter().enumerate() {
        if skill.tool.trim().is_empty() {
            errors.push(FieldError::new(&format!("skills.{}.tool", i), "Skill tool is required"));
        }
        if skill.level > 100 {
            errors.push(FieldError::new(&format!("skills.{}.level", i), "Level must be between 0 and 100"));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "title": "  Sales   Dashboard ",
            "description": "Quarterly revenue by region.",
            "tool": "Power BI",
            "tags": ["finance", "", "  kpi "],
            "images": ["/uploads/images/1700000000000-abcd-chart.png"]
        })
    }

    #[test]
    fn upload_paths() {
        assert!(is_valid_upload_path("/uploads/images/a-b_c.png"));
        assert!(is_valid_upload_path("/uploads/documents/notes.txt"));
        assert!(!is_valid_upload_path("/uploads/other/a.png"));
        assert!(!is_valid_upload_path("/uploads/images/../secret"));
        assert!(!is_valid_upload_path("/uploads/images//a.png"));
        assert!(!is_valid_upload_path("/uploads/images/a b.png"));
        assert!(!is_valid_upload_path("https://evil.example/a.png"));
    }

    #[test]
    fn project_ids() {
        assert!(is_valid_project_id("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert!(is_valid_project_id("sample-pbi-01"));
        assert!(!is_valid_project_id("0f8fad5b-d9cb-169f-a165-70867728950e"));
        assert!(!is_valid_project_id("../projects"));
    }

    #[test]
    fn create_sanitizes_and_defaults() {
        let draft = validate_create(&valid_body()).unwrap();
        assert_eq!(draft.title, "Sales Dashboard");
        assert_eq!(draft.tool, Some(Tool::PowerBi));
        assert_eq!(draft.tags, vec!["finance", "kpi"]);
        assert_eq!(draft.status, ProjectStatus::Draft);
        assert_eq!(draft.order, None);
        assert!(draft.video.is_none());
    }

    #[test]
    fn create_reports_every_problem() {
        let errors = validate_create(&json!({
            "title": "",
            "description": "short",
            "tool": "Looker",
            "embedUrl": "javascript:alert(1)",
            "video": "/etc/passwd"
        }))
        .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"description"));
        assert!(fields.contains(&"tool"));
        assert!(fields.contains(&"embedUrl"));
        assert!(fields.contains(&"video"));
    }

    #[test]
    fn create_requires_core_fields() {
        let errors = validate_create(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(validate_create(&json!([1, 2])).is_err());
    }

    #[test]
    fn title_length_limit() {
        let mut body = valid_body();
        body["title"] = json!("x".repeat(101));
        assert!(validate_create(&body).is_err());
        body["title"] = json!("x".repeat(100));
        assert!(validate_create(&body).is_ok());
    }

    #[test]
    fn tag_limits() {
        let mut body = valid_body();
        body["tags"] = json!((0..21).map(|i| format!("t{}", i)).collect::<Vec<_>>());
        assert!(validate_create(&body).is_err());
        body["tags"] = json!(["y".repeat(51)]);
        assert!(validate_create(&body).is_err());
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let patch = validate_patch(&json!({"video": null, "status": "archived"})).unwrap();
        assert_eq!(patch.video, Some(None));
        assert_eq!(patch.pdf, None);
        assert_eq!(patch.status, Some(ProjectStatus::Archived));
        assert!(patch.title.is_none());
    }

    #[test]
    fn patch_validates_present_fields() {
        assert!(validate_patch(&json!({"description": "tiny"})).is_err());
        assert!(validate_patch(&json!({"publishAt": "2024-13-01"})).is_err());
        let p = validate_patch(&json!({"publishAt": "2024-06-01T09:00:00Z"})).unwrap();
        assert!(p.publish_at.unwrap().is_some());
    }

    #[test]
    fn query_defaults_and_bounds() {
        let q = ProjectQuery::parse(&RawProjectQuery::default()).unwrap();
        assert_eq!(q, ProjectQuery::default());

        let raw = RawProjectQuery {
            limit: Some("0".into()),
            ..RawProjectQuery::default()
        };
        assert!(ProjectQuery::parse(&raw).is_err());

        let raw = RawProjectQuery {
            limit: Some("100".into()),
            page: Some("3".into()),
            sort: Some("title-asc".into()),
            search: Some("  ".into()),
            ..RawProjectQuery::default()
        };
        let q = ProjectQuery::parse(&raw).unwrap();
        assert_eq!(q.limit, 100);
        assert_eq!(q.page, 3);
        assert_eq!(q.sort, SortOrder::TitleAsc);
        assert!(q.search.is_none());
    }

    #[test]
    fn config_rules() {
        let mut cfg = SiteConfig::default();
        assert!(validate_config(&cfg).is_ok());
        cfg.profile.email = "nope".into();
        cfg.hero.headline = " ".into();
        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Number of diffs kept on each project for rollback.
pub const HISTORY_LIMIT: usize = 10;

/// Content fields that participate in history diffs. Identity and
/// bookkeeping fields (id, timestamps, history itself) never do.
pub const TRACKED_FIELDS: &[&str] = &[
    "title",
    "description",
    "tool",
    "tags",
    "status",
    "order",
    "images",
    "video",
    "pdf",
    "thumbnail",
    "documents",
    "embedUrl",
    "metaTitle",
    "metaDescription",
    "keywords",
    "publishAt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    #[serde(rename = "Power BI")]
    PowerBi,
    Tableau,
    Excel,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::PowerBi, Tool::Tableau, Tool::Excel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::PowerBi => "Power BI",
            Tool::Tableau => "Tableau",
            Tool::Excel => "Excel",
        }
    }

    /// Exact match on the stored label.
    pub fn parse(raw: &str) -> Option<Self> {
        Tool::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Published => "published",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(ProjectStatus::Draft),
            "published" => Some(ProjectStatus::Published),
            "archived" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tool: Tool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub embed_url: String,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Keys this schema does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validated input for a new project.
#[derive(Debug, Clone, Default)]
pub struct ProjectDraft {
    pub title: String,
    pub description: String,
    pub tool: Option<Tool>,
    pub tags: Vec<String>,
    pub status: ProjectStatus,
    pub order: Option<i64>,
    pub images: Vec<String>,
    pub video: Option<String>,
    pub pdf: Option<String>,
    pub thumbnail: Option<String>,
    pub documents: Vec<String>,
    pub embed_url: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub keywords: Vec<String>,
    pub publish_at: Option<DateTime<Utc>>,
}

/// Validated partial update. `None` leaves a field untouched; for the
/// nullable single-path fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tool: Option<Tool>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ProjectStatus>,
    pub order: Option<i64>,
    pub images: Option<Vec<String>>,
    pub video: Option<Option<String>>,
    pub pdf: Option<Option<String>>,
    pub thumbnail: Option<Option<String>>,
    pub documents: Option<Vec<String>>,
    pub embed_url: Option<String>,
    pub meta_title: Option<Option<String>>,
    pub meta_description: Option<Option<String>>,
    pub keywords: Option<Vec<String>>,
    pub publish_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub id: String,
    pub order: i64,
}

impl Project {
    pub fn from_draft(id: String, draft: ProjectDraft, order: i64, now: DateTime<Utc>) -> Option<Self> {
        Some(Project {
            id,
            title: draft.title,
            description: draft.description,
            tool: draft.tool?,
            tags: draft.tags,
            status: draft.status,
            order: draft.order.unwrap_or(order),
            images: draft.images,
            video: draft.video,
            pdf: draft.pdf,
            thumbnail: draft.thumbnail,
            documents: draft.documents,
            embed_url: draft.embed_url,
            meta_title: draft.meta_title,
            meta_description: draft.meta_description,
            keywords: draft.keywords,
            publish_at: draft.publish_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            history: Vec::new(),
            extra: Map::new(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.status == ProjectStatus::Published && !self.is_deleted()
    }

    pub fn apply_patch(&mut self, patch: ProjectPatch) {
        if let Some(v) = patch.title {
            self.title = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.tool {
            self.tool = v;
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.order {
            self.order = v;
        }
        if let Some(v) = patch.images {
            self.images = v;
        }
        if let Some(v) = patch.video {
            self.video = v;
        }
        if let Some(v) = patch.pdf {
            self.pdf = v;
        }
        if let Some(v) = patch.thumbnail {
            self.thumbnail = v;
        }
        if let Some(v) = patch.documents {
            self.documents = v;
        }
        if let Some(v) = patch.embed_url {
            self.embed_url = v;
        }
        if let Some(v) = patch.meta_title {
            self.meta_title = v;
        }
        if let Some(v) = patch.meta_description {
            self.meta_description = v;
        }
        if let Some(v) = patch.keywords {
            self.keywords = v;
        }
        if let Some(v) = patch.publish_at {
            self.publish_at = v;
        }
    }

    /// Every upload path this project references.
    pub fn media_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        paths.extend(self.images.iter().map(String::as_str));
        paths.extend(self.documents.iter().map(String::as_str));
        for single in [&self.video, &self.pdf, &self.thumbnail].into_iter().flatten() {
            paths.push(single.as_str());
        }
        paths
    }

    /// Field-level diff over the tracked content fields.
    pub fn diff(&self, newer: &Project) -> BTreeMap<String, FieldChange> {
        let old = serde_json::to_value(self).unwrap_or(Value::Null);
        let new = serde_json::to_value(newer).unwrap_or(Value::Null);
        let mut changes = BTreeMap::new();
        for field in TRACKED_FIELDS {
            let from = old.get(field).cloned().unwrap_or(Value::Null);
            let to = new.get(field).cloned().unwrap_or(Value::Null);
            if from != to {
                changes.insert(field.to_string(), FieldChange { from, to });
            }
        }
        changes
    }

    /// Push a history entry (newest first) and keep the list bounded.
    pub fn record_history(&mut self, changes: BTreeMap<String, FieldChange>, now: DateTime<Utc>) {
        if changes.is_empty() {
            return;
        }
        self.history.insert(
            0,
            HistoryEntry {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: now,
                changes,
            },
        );
        self.history.truncate(HISTORY_LIMIT);
    }

    /// Repair a raw JSON record into the current schema. Returns `None`
    /// for records that cannot be salvaged (no id, no title, unknown tool).
    pub fn heal(raw: &Value, now: DateTime<Utc>) -> Option<Self> {
        let obj = raw.as_object()?;

        let id = obj.get("id")?.as_str()?.trim().to_string();
        let title = obj.get("title")?.as_str()?.to_string();
        if id.is_empty() || title.is_empty() {
            return None;
        }
        let tool = Tool::parse(obj.get("tool")?.as_str()?)?;

        let strings = |key: &str| -> Vec<String> {
            match obj.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            }
        };
        let opt_string = |key: &str| -> Option<String> {
            obj.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let status = obj
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(ProjectStatus::parse)
            .unwrap_or(ProjectStatus::Published);
        let order = obj
            .get("order")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0);

        let created_at = obj.get("createdAt").and_then(parse_timestamp).unwrap_or(now);
        let updated_at = obj
            .get("updatedAt")
            .and_then(parse_timestamp)
            .unwrap_or(created_at);
        let deleted_at = match obj.get("deletedAt") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_timestamp(v).unwrap_or(now)),
        };
        let publish_at = obj.get("publishAt").and_then(parse_timestamp);

        let mut history: Vec<HistoryEntry> = obj
            .get("history")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        history.truncate(HISTORY_LIMIT);

        Some(Project {
            id,
            title,
            description: opt_string("description").unwrap_or_default(),
            tool,
            tags: strings("tags"),
            status,
            order,
            images: strings("images"),
            video: opt_string("video"),
            pdf: opt_string("pdf"),
            thumbnail: opt_string("thumbnail"),
            documents: strings("documents"),
            embed_url: opt_string("embedUrl").unwrap_or_default(),
            meta_title: opt_string("metaTitle"),
            meta_description: opt_string("metaDescription"),
            keywords: strings("keywords"),
            publish_at,
            created_at,
            updated_at,
            deleted_at,
            history,
            extra: obj
                .iter()
                .filter(|(k, _)| !is_schema_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

fn is_schema_key(key: &str) -> bool {
    TRACKED_FIELDS.contains(&key)
        || matches!(key, "id" | "createdAt" | "updatedAt" | "deletedAt" | "history")
}

/// Accepts RFC 3339, bare `YYYY-MM-DD` dates and epoch milliseconds.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        }
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

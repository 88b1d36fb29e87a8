use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of entries kept in the activity log.
pub const ACTIVITY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    Restore,
    Purge,
    Duplicate,
    Reorder,
    Rollback,
    Login,
    Logout,
    Upload,
    MediaDelete,
    Config,
    Backup,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActivityAction,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub actor: String,
}

impl ActivityEntry {
    pub fn new(action: ActivityAction, resource: &str, actor: &str) -> Self {
        ActivityEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            resource: resource.to_string(),
            resource_id: None,
            details: None,
            actor: actor.to_string(),
        }
    }

    pub fn on(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

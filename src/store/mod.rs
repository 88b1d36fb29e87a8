use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::StoreResult;
use crate::models::activity::ActivityEntry;
use crate::models::project::{OrderUpdate, Project, ProjectDraft, ProjectPatch};
use crate::models::site_config::SiteConfig;

pub mod json;

pub use json::JsonStore;

/// Outcome of a hard delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeReport {
    pub removed_files: Vec<String>,
    pub kept_files: Vec<String>,
}

/// Unified data-access trait. Every read and write of portfolio data goes
/// through here. Implementation: `JsonStore` (flat JSON files on disk).
pub trait Store: Send + Sync {
    /// Whether mutations are accepted in the running environment.
    fn can_write(&self) -> bool;

    // ── Projects ────────────────────────────────────────────────────

    /// Every record on disk (soft-deleted included), repaired and sorted by
    /// order ascending then newest first.
    fn project_list_all(&self) -> Vec<Project>;

    fn project_list(&self, include_deleted: bool) -> Vec<Project> {
        self.project_list_all()
            .into_iter()
            .filter(|p| include_deleted || !p.is_deleted())
            .collect()
    }

    fn project_list_deleted(&self) -> Vec<Project> {
        self.project_list_all()
            .into_iter()
            .filter(|p| p.is_deleted())
            .collect()
    }

    /// Looks up a project regardless of its deleted state.
    fn project_get(&self, id: &str) -> Option<Project> {
        self.project_list_all().into_iter().find(|p| p.id == id)
    }

    fn project_create(&self, draft: ProjectDraft) -> StoreResult<Project>;
    fn project_update(&self, id: &str, patch: ProjectPatch) -> StoreResult<Project>;
    fn project_soft_delete(&self, id: &str) -> StoreResult<Project>;
    fn project_restore(&self, id: &str) -> StoreResult<Project>;
    fn project_purge(&self, id: &str) -> StoreResult<PurgeReport>;
    fn project_duplicate(&self, id: &str) -> StoreResult<Project>;
    /// Returns the number of projects whose order actually changed.
    fn project_reorder(&self, updates: &[OrderUpdate]) -> StoreResult<usize>;
    fn project_rollback(&self, id: &str, history_id: &str) -> StoreResult<Project>;
    /// Insert fully-formed records whose ids are not present yet.
    fn project_seed(&self, samples: Vec<Project>) -> StoreResult<usize>;

    /// Unique tags in first-seen order across live projects.
    fn project_tags(&self, published_only: bool) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for p in self.project_list(false) {
            if published_only && !p.is_published() {
                continue;
            }
            for t in p.tags {
                if !tags.contains(&t) {
                    tags.push(t);
                }
            }
        }
        tags
    }

    /// Upload path -> ids of every project (deleted included) referencing it.
    fn media_usage(&self) -> BTreeMap<String, Vec<String>> {
        let mut usage: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for p in self.project_list_all() {
            for path in p.media_paths() {
                let ids = usage.entry(path.to_string()).or_default();
                if !ids.contains(&p.id) {
                    ids.push(p.id.clone());
                }
            }
        }
        usage
    }

    /// Raw projects document as stored, for backup downloads.
    fn snapshot(&self) -> StoreResult<Value>;

    // ── Site config ─────────────────────────────────────────────────

    fn config_get(&self) -> SiteConfig;
    fn config_update(&self, patch: &Value) -> StoreResult<SiteConfig>;

    // ── Activity log ────────────────────────────────────────────────

    fn activity_log(&self, entry: ActivityEntry) -> StoreResult<()>;
    fn activity_list(&self) -> Vec<ActivityEntry>;
    fn activity_clear(&self) -> StoreResult<()>;

    // ── Health ──────────────────────────────────────────────────────

    /// Parse check of the projects file without repair side effects.
    fn projects_readable(&self) -> Result<usize, String>;
    fn config_readable(&self) -> Result<(), String>;
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::{PurgeReport, Store};
use crate::config::AppConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::activity::{ActivityEntry, ACTIVITY_LIMIT};
use crate::models::project::{OrderUpdate, Project, ProjectDraft, ProjectPatch, ProjectStatus};
use crate::models::site_config::SiteConfig;
use crate::uploads;
use crate::validation;

const PROJECTS_FILE: &str = "projects.json";
const CONFIG_FILE: &str = "config.json";
const ACTIVITY_FILE: &str = "activity.json";

const COPY_SUFFIX: &str = " (Copy)";

/// Flat-file store. Each document lives in `data_dir` next to a
/// single-generation `*.bak.json` copy taken before every write.
pub struct JsonStore {
    data_dir: PathBuf,
    public_dir: PathBuf,
    writable: bool,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(data_dir: impl Into<PathBuf>, public_dir: impl Into<PathBuf>, writable: bool) -> Self {
        JsonStore {
            data_dir: data_dir.into(),
            public_dir: public_dir.into(),
            writable,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        JsonStore::new(config.data_dir.clone(), config.public_dir.clone(), config.can_write())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ── File plumbing ───────────────────────────────────────────────

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        self.data_dir.join(format!("{}.bak.json", stem))
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, ()>> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }
        Ok(self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn backup(&self, name: &str) {
        let current = self.path(name);
        if !current.exists() {
            return;
        }
        if let Err(e) = fs::copy(&current, self.backup_path(name)) {
            error!("Failed to back up {}: {}", current.display(), e);
        }
    }

    /// Pretty-printed write through a `.tmp` sibling and an atomic rename.
    fn write_raw<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> StoreResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        let target = self.path(name);
        let tmp = self.data_dir.join(format!("{}.tmp", name));
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn write_document<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> StoreResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        self.backup(name);
        self.write_raw(name, value)
    }

    fn read_value(path: &Path) -> Result<Value, String> {
        let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    }

    // ── Projects ────────────────────────────────────────────────────

    fn restore_projects_from_backup(&self) -> Vec<Value> {
        let bak = self.backup_path(PROJECTS_FILE);
        if !bak.exists() {
            return Vec::new();
        }
        match Self::read_value(&bak) {
            Ok(Value::Array(items)) => {
                warn!("Restored projects from backup");
                if self.writable {
                    if let Err(e) = self.write_raw(PROJECTS_FILE, &items) {
                        error!("Failed to rewrite projects file from backup: {}", e);
                    }
                }
                items
            }
            Ok(_) => {
                error!("Projects backup is not an array; starting empty");
                Vec::new()
            }
            Err(e) => {
                error!("Failed to restore projects from backup: {}", e);
                Vec::new()
            }
        }
    }

    fn load_raw_projects(&self) -> Vec<Value> {
        let path = self.path(PROJECTS_FILE);
        if !path.exists() {
            if self.writable {
                if let Err(e) = self.write_raw(PROJECTS_FILE, &Vec::<Value>::new()) {
                    warn!("Could not create {}: {}", path.display(), e);
                }
            }
            return Vec::new();
        }
        match Self::read_value(&path) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                error!("Projects file corrupted: not an array");
                self.restore_projects_from_backup()
            }
            Err(e) => {
                error!("Error reading projects: {}", e);
                self.restore_projects_from_backup()
            }
        }
    }

    /// Repaired records plus the raw records that could not be repaired.
    /// The latter are hidden from every listing but written back as-is.
    fn load_project_records(&self) -> (Vec<Project>, Vec<Value>) {
        let now = Utc::now();
        let mut projects = Vec::new();
        let mut unrecoverable = Vec::new();
        for raw in self.load_raw_projects() {
            match Project::heal(&raw, now) {
                Some(p) => projects.push(p),
                None => {
                    warn!(
                        "Skipping unrecoverable project record (id: {})",
                        raw.get("id").and_then(|v| v.as_str()).unwrap_or("<none>")
                    );
                    unrecoverable.push(raw);
                }
            }
        }
        projects.sort_by(|a, b| a.order.cmp(&b.order).then(b.created_at.cmp(&a.created_at)));
        (projects, unrecoverable)
    }

    fn load_projects(&self) -> Vec<Project> {
        self.load_project_records().0
    }

    /// Load, mutate, and persist the projects document under the write
    /// lock. The closure returns its result and whether anything changed.
    fn mutate_projects<T>(
        &self,
        f: impl FnOnce(&mut Vec<Project>) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let _lock = self.guard()?;
        let (mut projects, unrecoverable) = self.load_project_records();
        let (out, dirty) = f(&mut projects)?;
        if dirty {
            let mut records = projects
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<Value>, _>>()?;
            records.extend(unrecoverable);
            self.write_document(PROJECTS_FILE, &records)?;
        }
        Ok(out)
    }

    fn next_order(projects: &[Project]) -> i64 {
        projects.iter().map(|p| p.order).max().unwrap_or(0).max(0) + 1
    }

    fn live_index(projects: &[Project], id: &str) -> StoreResult<usize> {
        projects
            .iter()
            .position(|p| p.id == id && !p.is_deleted())
            .ok_or(StoreError::NotFound)
    }

    // ── Config ──────────────────────────────────────────────────────

    fn load_config(&self) -> SiteConfig {
        let path = self.path(CONFIG_FILE);
        if !path.exists() {
            if self.writable {
                warn!("Config file missing. Creating default config.");
                if let Err(e) = self.write_raw(CONFIG_FILE, &SiteConfig::default()) {
                    warn!("Could not create {}: {}", path.display(), e);
                }
            }
            return SiteConfig::default();
        }
        match Self::read_value(&path) {
            Ok(stored) => SiteConfig::from_stored(&stored),
            Err(e) => {
                error!("Error reading config: {}", e);
                match Self::read_value(&self.backup_path(CONFIG_FILE)) {
                    Ok(stored) => {
                        warn!("Using config backup");
                        SiteConfig::from_stored(&stored)
                    }
                    Err(_) => SiteConfig::default(),
                }
            }
        }
    }

    // ── Activity ────────────────────────────────────────────────────

    /// Raw log entries. Entries that no longer decode stay in the file but
    /// are left out of listings.
    fn load_activity_raw(&self) -> Vec<Value> {
        let path = self.path(ACTIVITY_FILE);
        if !path.exists() {
            return Vec::new();
        }
        match Self::read_value(&path) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                error!("[activity] Log is not an array");
                Vec::new()
            }
            Err(e) => {
                error!("[activity] Error reading log: {}", e);
                Vec::new()
            }
        }
    }

    fn load_activity(&self) -> Vec<ActivityEntry> {
        self.load_activity_raw()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("[activity] Skipping malformed entry: {}", e);
                    None
                }
            })
            .collect()
    }
}

impl Store for JsonStore {
    fn can_write(&self) -> bool {
        self.writable
    }

    fn project_list_all(&self) -> Vec<Project> {
        self.load_projects()
    }

    fn project_create(&self, draft: ProjectDraft) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let order = Self::next_order(projects);
            let project = Project::from_draft(uuid::Uuid::new_v4().to_string(), draft, order, Utc::now())
                .ok_or_else(|| StoreError::Validation("tool is required".into()))?;
            projects.push(project.clone());
            info!("Created project {} ({})", project.id, project.title);
            Ok((project, true))
        })
    }

    fn project_update(&self, id: &str, patch: ProjectPatch) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let idx = Self::live_index(projects, id)?;
            let before = projects[idx].clone();
            let mut after = before.clone();
            after.apply_patch(patch);
            let now = Utc::now();
            after.updated_at = now;
            let changes = before.diff(&after);
            after.record_history(changes, now);
            projects[idx] = after.clone();
            Ok((after, true))
        })
    }

    fn project_soft_delete(&self, id: &str) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let p = projects.iter_mut().find(|p| p.id == id).ok_or(StoreError::NotFound)?;
            if p.is_deleted() {
                return Ok((p.clone(), false));
            }
            let now = Utc::now();
            p.deleted_at = Some(now);
            p.updated_at = now;
            Ok((p.clone(), true))
        })
    }

    fn project_restore(&self, id: &str) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let p = projects.iter_mut().find(|p| p.id == id).ok_or(StoreError::NotFound)?;
            if !p.is_deleted() {
                return Ok((p.clone(), false));
            }
            p.deleted_at = None;
            p.updated_at = Utc::now();
            Ok((p.clone(), true))
        })
    }

    fn project_purge(&self, id: &str) -> StoreResult<PurgeReport> {
        let (removed, survivors) = self.mutate_projects(|projects| {
            let idx = projects.iter().position(|p| p.id == id).ok_or(StoreError::NotFound)?;
            let removed = projects.remove(idx);
            Ok(((removed, projects.clone()), true))
        })?;

        let mut report = PurgeReport::default();
        for path in removed.media_paths() {
            let shared = survivors.iter().any(|p| p.media_paths().contains(&path));
            if shared {
                report.kept_files.push(path.to_string());
                continue;
            }
            match uploads::delete_upload(&self.public_dir, path) {
                Ok(true) => report.removed_files.push(path.to_string()),
                Ok(false) => {}
                Err(e) => error!("Error deleting file {}: {}", path, e),
            }
        }
        info!("Purged project {} ({} files removed)", id, report.removed_files.len());
        Ok(report)
    }

    fn project_duplicate(&self, id: &str) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let idx = Self::live_index(projects, id)?;
            let now = Utc::now();
            let mut copy = projects[idx].clone();
            let keep = validation::TITLE_MAX - COPY_SUFFIX.len();
            let base: String = copy.title.chars().take(keep).collect();
            copy.id = uuid::Uuid::new_v4().to_string();
            copy.title = format!("{}{}", base, COPY_SUFFIX);
            copy.status = ProjectStatus::Draft;
            copy.order = Self::next_order(projects);
            copy.created_at = now;
            copy.updated_at = now;
            copy.deleted_at = None;
            copy.history.clear();
            projects.push(copy.clone());
            Ok((copy, true))
        })
    }

    fn project_reorder(&self, updates: &[OrderUpdate]) -> StoreResult<usize> {
        self.mutate_projects(|projects| {
            let mut changed = 0usize;
            for u in updates {
                if let Some(p) = projects.iter_mut().find(|p| p.id == u.id) {
                    if p.order != u.order {
                        p.order = u.order;
                        changed += 1;
                    }
                }
            }
            Ok((changed, changed > 0))
        })
    }

    fn project_rollback(&self, id: &str, history_id: &str) -> StoreResult<Project> {
        self.mutate_projects(|projects| {
            let idx = Self::live_index(projects, id)?;
            let before = projects[idx].clone();
            let entry = before
                .history
                .iter()
                .find(|h| h.id == history_id)
                .cloned()
                .ok_or(StoreError::NotFound)?;

            let mut doc = serde_json::to_value(&before)?;
            if let Value::Object(map) = &mut doc {
                for (field, change) in &entry.changes {
                    map.insert(field.clone(), change.from.clone());
                }
            }
            let mut after: Project = serde_json::from_value(doc)
                .map_err(|e| StoreError::Validation(format!("history entry cannot be applied: {}", e)))?;
            let now = Utc::now();
            after.updated_at = now;
            let changes = before.diff(&after);
            after.record_history(changes, now);
            projects[idx] = after.clone();
            Ok((after, true))
        })
    }

    fn snapshot(&self) -> StoreResult<Value> {
        let path = self.path(PROJECTS_FILE);
        if !path.exists() {
            return Ok(Value::Array(Vec::new()));
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn config_get(&self) -> SiteConfig {
        self.load_config()
    }

    fn config_update(&self, patch: &Value) -> StoreResult<SiteConfig> {
        let _lock = self.guard()?;
        let current = self.load_config();
        let next = current.merged_with(patch).map_err(StoreError::Validation)?;
        if let Err(errors) = validation::validate_config(&next) {
            let msg = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StoreError::Validation(msg));
        }
        self.write_document(CONFIG_FILE, &next)?;
        info!("Site config updated");
        Ok(next)
    }

    fn activity_log(&self, entry: ActivityEntry) -> StoreResult<()> {
        let _lock = self.guard()?;
        let mut entries = self.load_activity_raw();
        entries.insert(0, serde_json::to_value(entry)?);
        entries.truncate(ACTIVITY_LIMIT);
        self.write_document(ACTIVITY_FILE, &entries)
    }

    fn activity_list(&self) -> Vec<ActivityEntry> {
        self.load_activity()
    }

    fn activity_clear(&self) -> StoreResult<()> {
        let _lock = self.guard()?;
        self.write_document(ACTIVITY_FILE, &Vec::<ActivityEntry>::new())
    }

    fn project_seed(&self, samples: Vec<Project>) -> StoreResult<usize> {
        self.mutate_projects(|projects| {
            let mut added = 0usize;
            for sample in samples {
                if projects.iter().any(|p| p.id == sample.id) {
                    continue;
                }
                projects.push(sample);
                added += 1;
            }
            Ok((added, added > 0))
        })
    }

    fn projects_readable(&self) -> Result<usize, String> {
        let path = self.path(PROJECTS_FILE);
        if !path.exists() {
            return Ok(0);
        }
        match Self::read_value(&path)? {
            Value::Array(items) => Ok(items.len()),
            _ => Err("projects file is not an array".into()),
        }
    }

    fn config_readable(&self) -> Result<(), String> {
        let path = self.path(CONFIG_FILE);
        if !path.exists() {
            return Ok(());
        }
        match Self::read_value(&path)? {
            Value::Object(_) => Ok(()),
            _ => Err("config file is not an object".into()),
        }
    }
}

use chrono::Utc;
use log::{error, info, warn};
use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::StoreResult;
use crate::models::project::{Project, ProjectDraft, ProjectStatus, Tool};
use crate::store::Store;
use crate::uploads;

/// Outcome of the pre-launch checks. Any error aborts start-up.
#[derive(Debug, Default)]
pub struct BootReport {
    pub warnings: u32,
    pub errors: u32,
}

fn writable(dir: &Path) -> std::io::Result<()> {
    let test_file = dir.join(".write_test");
    fs::write(&test_file, "test")?;
    fs::remove_file(&test_file)
}

/// Run all boot checks. Call this before Rocket launches.
/// Creates missing directories and probes that they accept writes.
pub fn run(config: &AppConfig) -> BootReport {
    info!("Chartfolio boot check starting ({})", config.environment_name());
    let mut report = BootReport::default();

    // ── 1. Data directory ──────────────────────────────
    match fs::create_dir_all(&config.data_dir) {
        Ok(_) => {
            if let Err(e) = writable(&config.data_dir) {
                if config.can_write() {
                    error!("  Data directory not writable: {}", e);
                    report.errors += 1;
                } else {
                    info!("  Data directory is read-only ({})", e);
                }
            }
        }
        Err(e) => {
            error!("  FAILED to create data directory {}: {}", config.data_dir.display(), e);
            report.errors += 1;
        }
    }

    // ── 2. Upload directories ──────────────────────────
    let uploads_dir = config.uploads_dir();
    match uploads::ensure_dirs(&uploads_dir) {
        Ok(_) => {
            if let Err(e) = writable(&uploads_dir) {
                warn!("  Uploads directory not writable: {} (file uploads will fail)", e);
                report.warnings += 1;
            }
        }
        Err(e) => {
            warn!("  FAILED to create uploads directories {}: {}", uploads_dir.display(), e);
            report.warnings += 1;
        }
    }

    // ── 3. Credentials ─────────────────────────────────
    if !config.credentials_configured() {
        warn!("  Admin credentials not configured: set ADMIN_USERNAME, ADMIN_PASSWORD (or ADMIN_PASSWORD_HASH) and SESSION_SECRET");
        report.warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if report.errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s).",
            report.errors, report.warnings
        );
    } else if report.warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            report.warnings
        );
    } else {
        info!("Boot check passed. All systems go.");
    }
    report
}

// ── Sample data ─────────────────────────────────────────

pub fn sample_projects() -> Vec<Project> {
    let now = Utc::now();
    let samples = [
        (
            "sample-pbi-01",
            "Retail Sales Dashboard",
            "Comprehensive Power BI report analyzing global retail performance with YoY growth metrics and regional heatmaps.",
            Tool::PowerBi,
            ["Retail", "DAX", "Sales"],
            ProjectStatus::Published,
        ),
        (
            "sample-tab-01",
            "Healthcare Analytics",
            "Tableau visualization tracking patient wait times and departmental efficiency scores.",
            Tool::Tableau,
            ["Healthcare", "KPIs", "Operations"],
            ProjectStatus::Published,
        ),
        (
            "sample-xls-01",
            "Financial Model Pro",
            "Advanced Excel financial model with VBA macros for scenario planning and risk assessment.",
            Tool::Excel,
            ["Finance", "VBA", "Modeling"],
            ProjectStatus::Draft,
        ),
    ];
    samples
        .into_iter()
        .zip(1i64..)
        .filter_map(|((id, title, description, tool, tags, status), order)| {
            let draft = ProjectDraft {
                title: title.to_string(),
                description: description.to_string(),
                tool: Some(tool),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                status,
                ..ProjectDraft::default()
            };
            Project::from_draft(id.to_string(), draft, order, now)
        })
        .collect()
}

/// Seed the sample projects when the store holds no records.
pub fn seed(store: &dyn Store) -> StoreResult<usize> {
    if !store.project_list_all().is_empty() {
        info!("Projects exist. Skipping sample seed.");
        return Ok(0);
    }
    let added = store.project_seed(sample_projects())?;
    info!("Seeded {} sample project(s)", added);
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;

    #[test]
    fn creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().join("data"),
            public_dir: dir.path().join("public"),
            ..AppConfig::default()
        };
        let report = run(&config);
        assert_eq!(report.errors, 0);
        // credentials are unset in the default config
        assert!(report.warnings >= 1);
        assert!(config.data_dir.is_dir());
        for sub in ["images", "videos", "pdfs", "documents"] {
            assert!(config.uploads_dir().join(sub).is_dir());
        }
        assert!(!config.data_dir.join(".write_test").exists());
    }

    #[test]
    fn seeds_only_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("data"), dir.path().join("public"), true);
        assert_eq!(seed(&store).unwrap(), 3);
        assert_eq!(seed(&store).unwrap(), 0);

        let all = store.project_list_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "sample-pbi-01");
        assert_eq!(
            store.project_get("sample-xls-01").unwrap().status,
            ProjectStatus::Draft
        );
    }
}

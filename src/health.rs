use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use crate::config::AppConfig;
use crate::store::Store;
use crate::uploads::{self, UploadCategory};

/// Boot instant, set once at startup via `init_uptime()`.
static BOOT_INSTANT: OnceLock<Instant> = OnceLock::new();

pub fn init_uptime() {
    let _ = BOOT_INSTANT.set(Instant::now());
}

fn uptime_secs() -> u64 {
    BOOT_INSTANT.get().map(|b| b.elapsed().as_secs()).unwrap_or(0)
}

// ── Data Structures ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub server: &'static str,
    pub timestamp: String,
    pub environment: &'static str,
    pub uptime_secs: u64,
    pub disk: DiskInfo,
    pub checks: Checks,
}

impl HealthReport {
    /// Unreadable projects or config make the service unhealthy. Upload
    /// problems are reported but do not.
    pub fn is_healthy(&self) -> bool {
        self.checks.database.status != CheckStatus::Error
            && self.checks.config.status != CheckStatus::Error
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct DiskInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
}

impl DiskInfo {
    fn from_blocks(blocks: u64, available: u64, block_size: u64) -> Self {
        let total_bytes = blocks.saturating_mul(block_size);
        let free_bytes = available.saturating_mul(block_size).min(total_bytes);
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            let used = (total_bytes - free_bytes) as f64 / total_bytes as f64;
            (used * 1000.0).round() / 10.0
        };
        DiskInfo {
            total_bytes,
            free_bytes,
            used_percent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Checks {
    pub database: Check,
    pub config: Check,
    pub uploads: Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Missing,
    Error,
}

#[derive(Debug, Serialize)]
pub struct Check {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subdirectories: Vec<&'static str>,
}

impl Check {
    fn new(status: CheckStatus) -> Self {
        Check {
            status,
            path: None,
            message: None,
            records: None,
            writable: None,
            subdirectories: Vec::new(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Check {
            message: Some(message.into()),
            ..Check::new(CheckStatus::Error)
        }
    }

    fn missing() -> Self {
        Check {
            message: Some("Will be created on first use".into()),
            ..Check::new(CheckStatus::Missing)
        }
    }
}

// ── Gathering ───────────────────────────────────────────────

pub fn gather(config: &AppConfig, store: &dyn Store) -> HealthReport {
    HealthReport {
        server: "online",
        timestamp: Utc::now().to_rfc3339(),
        environment: config.environment_name(),
        uptime_secs: uptime_secs(),
        disk: disk_usage(&config.data_dir).unwrap_or_default(),
        checks: Checks {
            database: check_database(config, store),
            config: check_config(config, store),
            uploads: check_uploads(&config.uploads_dir()),
        },
    }
}

fn check_database(config: &AppConfig, store: &dyn Store) -> Check {
    if !config.data_dir.join("projects.json").exists() {
        return Check::missing();
    }
    match store.projects_readable() {
        Ok(n) => Check {
            path: Some("data/projects.json".into()),
            records: Some(n),
            ..Check::new(CheckStatus::Healthy)
        },
        Err(e) => Check::error(e),
    }
}

fn check_config(config: &AppConfig, store: &dyn Store) -> Check {
    if !config.data_dir.join("config.json").exists() {
        return Check::missing();
    }
    match store.config_readable() {
        Ok(()) => Check {
            path: Some("data/config.json".into()),
            ..Check::new(CheckStatus::Healthy)
        },
        Err(e) => Check::error(e),
    }
}

/// Creates the uploads tree if needed and probes it with a throwaway file.
fn check_uploads(uploads_dir: &Path) -> Check {
    let probe = || -> std::io::Result<()> {
        fs::create_dir_all(uploads_dir)?;
        let test_file = uploads_dir.join(".health-check");
        fs::write(&test_file, "ok")?;
        fs::remove_file(&test_file)?;
        uploads::ensure_dirs(uploads_dir)
    };
    match probe() {
        Ok(()) => Check {
            writable: Some(true),
            subdirectories: UploadCategory::ALL.iter().map(|c| c.as_str()).collect(),
            ..Check::new(CheckStatus::Healthy)
        },
        Err(e) => Check::error(e.to_string()),
    }
}

/// Filesystem figures for the volume holding `path` (or its nearest
/// existing ancestor, since the data directory may not exist yet).
#[cfg(unix)]
fn disk_usage(path: &Path) -> Option<DiskInfo> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let target = path.ancestors().find(|p| p.exists()).unwrap_or(Path::new("."));
    let c_path = CString::new(target.as_os_str().as_bytes()).ok()?;
    // SAFETY: `stat` is plain old data and `c_path` is NUL-terminated.
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        stat
    };
    Some(DiskInfo::from_blocks(
        stat.f_blocks as u64,
        stat.f_bavail as u64,
        stat.f_frsize as u64,
    ))
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> Option<DiskInfo> {
    None
}

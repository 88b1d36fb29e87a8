use log::warn;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Runtime environment. Production deployments are read-only unless
/// CMS mode is forced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub api: u64,
    pub auth: u64,
    pub upload: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            window_secs: 60,
            api: 60,
            auth: 10,
            upload: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub codespaces: bool,
    pub cms_mode: Option<bool>,
    pub data_dir: PathBuf,
    pub public_dir: PathBuf,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_password_hash: Option<String>,
    pub session_secret: Option<String>,
    pub session_max_age_secs: u64,
    pub rate_limit: RateLimitConfig,
    pub metrics_ttl_ms: u64,
    pub seed_samples: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            environment: Environment::Development,
            codespaces: false,
            cms_mode: None,
            data_dir: PathBuf::from("data"),
            public_dir: PathBuf::from("public"),
            admin_username: None,
            admin_password: None,
            admin_password_hash: None,
            session_secret: None,
            session_max_age_secs: 8 * 60 * 60,
            rate_limit: RateLimitConfig::default(),
            metrics_ttl_ms: 5000,
            seed_samples: false,
        }
    }
}

/// Shape of the optional TOML file. Every key is optional; environment
/// variables win over the file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    environment: Option<String>,
    cms_mode: Option<bool>,
    data_dir: Option<PathBuf>,
    public_dir: Option<PathBuf>,
    admin_username: Option<String>,
    admin_password_hash: Option<String>,
    session_max_age_secs: Option<u64>,
    metrics_ttl_ms: Option<u64>,
    seed_samples: Option<bool>,
    rate_limit: Option<FileRateLimit>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRateLimit {
    window_secs: Option<u64>,
    api: Option<u64>,
    auth: Option<u64>,
    upload: Option<u64>,
}

impl AppConfig {
    /// Load `chartfolio.toml` (or `$CHARTFOLIO_CONFIG`) if present, then
    /// apply environment variable overrides.
    pub fn load() -> Self {
        let path = env::var("CHARTFOLIO_CONFIG").unwrap_or_else(|_| "chartfolio.toml".to_string());
        AppConfig::load_from(Path::new(&path))
    }

    /// A missing or malformed file leaves the defaults in place.
    fn load_from(path: &Path) -> Self {
        let mut config = AppConfig::default();
        if path.exists() {
            match config.clone().with_file_overrides(path) {
                Ok(c) => config = c,
                Err(e) => warn!("Ignoring config file {}: {}", path.display(), e),
            }
        }
        config.with_env_overrides()
    }

    pub fn with_file_overrides(mut self, path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let file: FileConfig = toml::from_str(&raw).map_err(|e| e.to_string())?;

        if let Some(v) = file.environment {
            self.environment = Environment::parse(&v);
        }
        if file.cms_mode.is_some() {
            self.cms_mode = file.cms_mode;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.public_dir {
            self.public_dir = v;
        }
        if file.admin_username.is_some() {
            self.admin_username = file.admin_username;
        }
        if file.admin_password_hash.is_some() {
            self.admin_password_hash = file.admin_password_hash;
        }
        if let Some(v) = file.session_max_age_secs {
            self.session_max_age_secs = v;
        }
        if let Some(v) = file.metrics_ttl_ms {
            self.metrics_ttl_ms = v;
        }
        if let Some(v) = file.seed_samples {
            self.seed_samples = v;
        }
        if let Some(rl) = file.rate_limit {
            if let Some(v) = rl.window_secs {
                self.rate_limit.window_secs = v;
            }
            if let Some(v) = rl.api {
                self.rate_limit.api = v;
            }
            if let Some(v) = rl.auth {
                self.rate_limit.auth = v;
            }
            if let Some(v) = rl.upload {
                self.rate_limit.upload = v;
            }
        }
        Ok(self)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("APP_ENV") {
            self.environment = Environment::parse(&v);
        }
        if let Ok(v) = env::var("CODESPACES") {
            self.codespaces = v == "true";
        }
        if let Ok(v) = env::var("CMS_MODE") {
            self.cms_mode = Some(v == "true");
        }
        if let Ok(v) = env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("PUBLIC_DIR") {
            self.public_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty_var("ADMIN_USERNAME") {
            self.admin_username = Some(v);
        }
        if let Some(v) = non_empty_var("ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        if let Some(v) = non_empty_var("ADMIN_PASSWORD_HASH") {
            self.admin_password_hash = Some(v);
        }
        if let Some(v) = non_empty_var("SESSION_SECRET") {
            self.session_secret = Some(v);
        }
        if let Ok(v) = env::var("SESSION_MAX_AGE") {
            self.session_max_age_secs = v.parse().unwrap_or(self.session_max_age_secs);
        }
        if let Ok(v) = env::var("RATE_LIMIT_WINDOW") {
            self.rate_limit.window_secs = v.parse().unwrap_or(self.rate_limit.window_secs);
        }
        if let Ok(v) = env::var("RATE_LIMIT_API") {
            self.rate_limit.api = v.parse().unwrap_or(self.rate_limit.api);
        }
        if let Ok(v) = env::var("RATE_LIMIT_AUTH") {
            self.rate_limit.auth = v.parse().unwrap_or(self.rate_limit.auth);
        }
        if let Ok(v) = env::var("RATE_LIMIT_UPLOAD") {
            self.rate_limit.upload = v.parse().unwrap_or(self.rate_limit.upload);
        }
        if let Ok(v) = env::var("METRICS_TTL_MS") {
            self.metrics_ttl_ms = v.parse().unwrap_or(self.metrics_ttl_ms);
        }
        if let Ok(v) = env::var("SEED_SAMPLES") {
            self.seed_samples = v == "true";
        }
        self
    }

    // ── Environment detection ───────────────────────────

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_codespaces(&self) -> bool {
        self.codespaces
    }

    pub fn is_local(&self) -> bool {
        !self.is_production() && !self.is_codespaces()
    }

    /// Write-enabled context: explicit override, Codespaces, or any
    /// non-production run.
    pub fn is_cms(&self) -> bool {
        if let Some(forced) = self.cms_mode {
            if forced {
                return true;
            }
        }
        self.is_codespaces() || !self.is_production()
    }

    pub fn can_write(&self) -> bool {
        self.is_cms()
    }

    pub fn environment_name(&self) -> &'static str {
        if self.is_codespaces() {
            "CMS (Codespaces)"
        } else if self.is_local() {
            "CMS (Local)"
        } else {
            "Production (Read-Only)"
        }
    }

    pub fn credentials_configured(&self) -> bool {
        self.admin_username.is_some()
            && (self.admin_password.is_some() || self.admin_password_hash.is_some())
            && self.session_secret.is_some()
    }

    // ── Paths ───────────────────────────────────────────

    pub fn uploads_dir(&self) -> PathBuf {
        self.public_dir.join("uploads")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_is_cms() {
        let c = AppConfig::default();
        assert!(c.is_cms());
        assert!(c.can_write());
        assert_eq!(c.environment_name(), "CMS (Local)");
    }

    #[test]
    fn production_is_read_only_unless_forced() {
        let mut c = AppConfig {
            environment: Environment::Production,
            ..AppConfig::default()
        };
        assert!(!c.can_write());
        assert_eq!(c.environment_name(), "Production (Read-Only)");

        c.cms_mode = Some(true);
        assert!(c.can_write());

        c.cms_mode = None;
        c.codespaces = true;
        assert!(c.can_write());
        assert_eq!(c.environment_name(), "CMS (Codespaces)");
    }

    #[test]
    fn credentials_need_secret_and_password() {
        let mut c = AppConfig {
            admin_username: Some("admin".into()),
            admin_password: Some("pw".into()),
            ..AppConfig::default()
        };
        assert!(!c.credentials_configured());
        c.session_secret = Some("s3cret".into());
        assert!(c.credentials_configured());
    }

    #[test]
    fn toml_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chartfolio.toml");
        std::fs::write(
            &path,
            r#"
environment = "production"
data_dir = "/srv/folio/data"
seed_samples = true

[rate_limit]
auth = 3
"#,
        )
        .unwrap();

        let c = AppConfig::default().with_file_overrides(&path).unwrap();
        assert!(c.is_production());
        assert_eq!(c.data_dir, PathBuf::from("/srv/folio/data"));
        assert!(c.seed_samples);
        assert_eq!(c.rate_limit.auth, 3);
        assert_eq!(c.rate_limit.api, 60);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "environment = [").unwrap();
        assert!(AppConfig::default().with_file_overrides(&path).is_err());
    }

    #[test]
    fn malformed_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "metrics_ttl_ms = \"soon\"").unwrap();
        let c = AppConfig::load_from(&path);
        assert_eq!(c.session_max_age_secs, 8 * 60 * 60);
        assert_eq!(c.rate_limit.window_secs, 60);
    }

    #[test]
    fn forced_cms_in_production_keeps_production_label() {
        let c = AppConfig {
            environment: Environment::Production,
            cms_mode: Some(true),
            ..AppConfig::default()
        };
        assert!(c.can_write());
        assert_eq!(c.environment_name(), "Production (Read-Only)");
    }
}

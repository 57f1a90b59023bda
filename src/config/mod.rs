//! TOML configuration.
//!
//! Every section defaults, so a missing file or a file with a single section
//! is a valid configuration. Secrets may come from the environment instead of
//! the file: `SAJILO_BOT_TOKEN` and `SAJILO_SUBMISSION_PASSWORD` win over
//! whatever the file says.

use crate::forms::fields::NumericOverflow;
use crate::session::LanguagePolicy;
use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_BOT_TOKEN: &str = "SAJILO_BOT_TOKEN";
pub const ENV_SUBMISSION_PASSWORD: &str = "SAJILO_SUBMISSION_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub classifier: ClassifierConfig,
    pub submission: SubmissionConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub validation: ValidationConfig,
    pub forms: FormsConfig,
    pub directory: DirectoryConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Usernames or numeric ids; `*` admits everyone. Empty admits no one.
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Ollama,
    #[default]
    Keywords,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Keywords,
            endpoint: "http://localhost:11434/api/generate".into(),
            model: "qwen2.5:1.5b".into(),
            timeout_ms: 3_000,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Remote ex-gratia service. Without a `base_url` applications stay local.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub base_url: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: String::new(),
            password: String::new(),
            timeout_secs: 20,
        }
    }
}

impl SubmissionConfig {
    pub fn enabled(&self) -> bool {
        self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = project_dirs()
            .map(|d| d.data_dir().join("records.db").display().to_string())
            .unwrap_or_else(|| "records.db".into());
        Self { db_path }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub language_policy: LanguagePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1_800,
            sweep_interval_secs: 60,
            language_policy: LanguagePolicy::Retain,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub numeric_overflow: NumericOverflow,
}

/// `dir` holds form files overriding the built-ins by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsConfig {
    pub dir: Option<String>,
}

impl FormsConfig {
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir.as_deref().filter(|d| !d.trim().is_empty()).map(expand_path)
    }
}

/// `path` replaces the built-in directory tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub path: Option<String>,
}

impl DirectoryConfig {
    pub fn path(&self) -> Option<PathBuf> {
        self.path.as_deref().filter(|p| !p.trim().is_empty()).map(expand_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8088".into(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("in", "sajilo", "sajilo")
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

/// `config.toml` in the platform config directory.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

impl Config {
    /// Load from `path` (or the default location), then apply environment
    /// overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))?
        } else {
            tracing::debug!("no config at {}; using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay secrets from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_BOT_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(password) = lookup(ENV_SUBMISSION_PASSWORD).filter(|v| !v.is_empty()) {
            self.submission.password = password;
        }
    }

    /// Every problem at once. `telegram` says whether Telegram is the transport.
    pub fn validate(&self, telegram: bool) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if telegram && self.telegram.bot_token.trim().is_empty() {
            problems.push(format!(
                "telegram.bot_token is empty (set it or {ENV_BOT_TOKEN})"
            ));
        }
        if telegram && self.telegram.allowed_users.is_empty() {
            problems.push("telegram.allowed_users is empty; nobody could use the bot".into());
        }

        if self.classifier.timeout_ms == 0 {
            problems.push("classifier.timeout_ms must be greater than 0".into());
        }
        if self.classifier.backend == ClassifierBackend::Ollama {
            if self.classifier.endpoint.trim().is_empty() {
                problems.push("classifier.endpoint is required for the ollama backend".into());
            }
            if self.classifier.model.trim().is_empty() {
                problems.push("classifier.model is required for the ollama backend".into());
            }
        }

        if self.submission.enabled() {
            if let Some(url) = &self.submission.base_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    problems.push(format!("submission.base_url '{url}' is not an http(s) URL"));
                }
            }
            if self.submission.username.trim().is_empty() {
                problems.push("submission.username is required when base_url is set".into());
            }
            if self.submission.password.is_empty() {
                problems.push(format!(
                    "submission.password is required when base_url is set (or {ENV_SUBMISSION_PASSWORD})"
                ));
            }
        }
        if self.submission.timeout_secs == 0 {
            problems.push("submission.timeout_secs must be greater than 0".into());
        }

        if self.storage.db_path.trim().is_empty() {
            problems.push("storage.db_path must not be empty".into());
        }

        if self.session.idle_timeout_secs == 0 {
            problems.push("session.idle_timeout_secs must be greater than 0".into());
        }
        if self.session.sweep_interval_secs == 0 {
            problems.push("session.sweep_interval_secs must be greater than 0".into());
        }

        if let Some(dir) = self.forms.dir() {
            if !dir.is_dir() {
                problems.push(format!("forms.dir {} is not a directory", dir.display()));
            }
        }
        if let Some(path) = self.directory.path() {
            if !path.is_file() {
                problems.push(format!("directory.path {} does not exist", path.display()));
            }
        }

        if self.api.enabled && self.api.bind.parse::<SocketAddr>().is_err() {
            problems.push(format!("api.bind '{}' is not a socket address", self.api.bind));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_conservative() {
        let config = Config::default();
        assert_eq!(config.classifier.backend, ClassifierBackend::Keywords);
        assert!(!config.submission.enabled());
        assert!(!config.api.enabled);
        assert_eq!(config.session.language_policy, LanguagePolicy::Retain);
        assert_eq!(config.validation.numeric_overflow, NumericOverflow::Clip);
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [session]
            language_policy = "reset"

            [validation]
            numeric_overflow = "reject"

            [classifier]
            backend = "ollama"
            timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.session.language_policy, LanguagePolicy::Reset);
        assert_eq!(config.session.idle_timeout_secs, 1_800);
        assert_eq!(config.validation.numeric_overflow, NumericOverflow::Reject);
        assert_eq!(config.classifier.backend, ClassifierBackend::Ollama);
        assert_eq!(config.classifier.timeout(), Duration::from_millis(500));
        assert!(config.classifier.endpoint.contains("11434"));
    }

    #[test]
    fn malformed_file_is_an_error_naming_the_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[session\nidle_timeout_secs = ").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.api.bind, "127.0.0.1:8088");
    }

    #[test]
    fn environment_secrets_take_precedence() {
        let mut config = Config::from_toml(
            r#"
            [telegram]
            bot_token = "from-file"
            "#,
        )
        .unwrap();
        config.apply_env(|key| match key {
            ENV_BOT_TOKEN => Some(" from-env ".into()),
            ENV_SUBMISSION_PASSWORD => Some("s3cret".into()),
            _ => None,
        });
        assert_eq!(config.telegram.bot_token, "from-env");
        assert_eq!(config.submission.password, "s3cret");

        let mut untouched = Config::default();
        untouched.telegram.bot_token = "kept".into();
        untouched.apply_env(|_| Some("   ".into()));
        assert_eq!(untouched.telegram.bot_token, "kept");
    }

    #[test]
    fn validate_reports_every_problem() {
        let config = Config::from_toml(
            r#"
            [classifier]
            timeout_ms = 0

            [submission]
            base_url = "ftp://nc.example"

            [session]
            sweep_interval_secs = 0

            [api]
            enabled = true
            bind = "not-an-address"
            "#,
        )
        .unwrap();
        let problems = config.validate(true).unwrap_err();
        let joined = problems.join("\n");
        for needle in [
            "telegram.bot_token",
            "telegram.allowed_users",
            "classifier.timeout_ms",
            "submission.base_url",
            "submission.username",
            "submission.password",
            "session.sweep_interval_secs",
            "api.bind",
        ] {
            assert!(joined.contains(needle), "missing {needle} in:\n{joined}");
        }
    }

    #[test]
    fn paths_expand_tilde() {
        let storage = StorageConfig {
            db_path: "~/sajilo/records.db".into(),
        };
        assert!(!storage.db_path().display().to_string().starts_with('~'));
        let forms = FormsConfig { dir: Some("   ".into()) };
        assert_eq!(forms.dir(), None);
    }
}

//! Configuration management for docsift using the prefer crate.
//!
//! Precedence, lowest to highest: built-in defaults, config file (explicit
//! `--config` path or prefer auto-discovery), `--data` flag, `DOCSIFT_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::CommandAnalyzerConfig;
use crate::tasks::LifecycleSettings;

const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base data directory (uploads and analyzer scratch output).
    pub data_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Keep uploads and analyzer output after a task finishes.
    pub keep_files: bool,
    /// Worker pool size.
    pub workers: usize,
    pub processing_timeout: Duration,
    pub recovery_interval: Duration,
    pub recovery_grace: Duration,
    pub retention_interval: Duration,
    pub retention_window: Duration,
    /// Registry capacity, 0 = unbounded.
    pub max_tasks: usize,
    /// External analysis command.
    pub analyzer: CommandAnalyzerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docsift");

        Self {
            data_dir,
            bind: DEFAULT_BIND.to_string(),
            max_upload_bytes: 200 * 1024 * 1024,
            keep_files: false,
            workers: 4,
            processing_timeout: Duration::from_secs(300),
            recovery_interval: Duration::from_secs(60),
            recovery_grace: Duration::from_secs(600),
            retention_interval: Duration::from_secs(3600),
            retention_window: Duration::from_secs(3600),
            max_tasks: 0,
            analyzer: CommandAnalyzerConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Check the relationships the lifecycle relies on.
    ///
    /// The recovery grace must exceed the processing timeout so the sweeper
    /// never races a legitimate near-timeout completion, and must be shorter
    /// than the retention window so stuck tasks are recovered before eviction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers.size must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("lifecycle.processing_timeout_secs", self.processing_timeout),
            ("lifecycle.recovery_interval_secs", self.recovery_interval),
            ("lifecycle.recovery_grace_secs", self.recovery_grace),
            ("lifecycle.retention_interval_secs", self.retention_interval),
            ("lifecycle.retention_window_secs", self.retention_window),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        if self.processing_timeout >= self.recovery_grace {
            return Err(ConfigError::Invalid(format!(
                "recovery grace ({}s) must be longer than the processing timeout ({}s)",
                self.recovery_grace.as_secs(),
                self.processing_timeout.as_secs()
            )));
        }
        if self.recovery_grace >= self.retention_window {
            return Err(ConfigError::Invalid(format!(
                "retention window ({}s) must be longer than the recovery grace ({}s)",
                self.retention_window.as_secs(),
                self.recovery_grace.as_secs()
            )));
        }
        if self.analyzer.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "analyzer.command must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifecycle knobs for the task controller.
    pub fn lifecycle(&self) -> LifecycleSettings {
        LifecycleSettings {
            processing_timeout: self.processing_timeout,
            required_artifacts: self.analyzer.required_artifacts.clone(),
            keep_files: self.keep_files,
        }
    }

    /// Create the data directory if needed.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Render the effective settings as a fully populated config file.
    pub fn to_config(&self) -> Config {
        Config {
            data_dir: Some(self.data_dir.display().to_string()),
            bind: Some(self.bind.clone()),
            max_upload_mb: Some((self.max_upload_bytes / (1024 * 1024)) as u64),
            keep_files: Some(self.keep_files),
            workers: WorkersConfig {
                size: Some(self.workers),
            },
            lifecycle: LifecycleConfig {
                processing_timeout_secs: Some(self.processing_timeout.as_secs()),
                recovery_interval_secs: Some(self.recovery_interval.as_secs()),
                recovery_grace_secs: Some(self.recovery_grace.as_secs()),
                retention_interval_secs: Some(self.retention_interval.as_secs()),
                retention_window_secs: Some(self.retention_window.as_secs()),
                max_tasks: Some(self.max_tasks),
            },
            analyzer: Some(self.analyzer.clone()),
            source_path: None,
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl WorkersConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// `[lifecycle]` section. All values in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_grace_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tasks: Option<usize>,
}

impl LifecycleConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Server bind address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Upload size limit in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_files: Option<bool>,
    #[serde(default, skip_serializing_if = "WorkersConfig::is_default")]
    pub workers: WorkersConfig,
    #[serde(default, skip_serializing_if = "LifecycleConfig::is_default")]
    pub lifecycle: LifecycleConfig,
    /// Analyzer command. Missing fields take their defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<CommandAnalyzerConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a docsift config file in the standard locations.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("docsift").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, or JSON (default).
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_error("TOML", e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error("YAML", e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_error("JSON", e.to_string()))?,
        };

        tracing::debug!("Loaded config from {}", path.display());
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, if it came from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// `~` is expanded; relative paths are joined onto `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }
        if let Some(mb) = self.max_upload_mb {
            settings.max_upload_bytes = (mb as usize).saturating_mul(1024 * 1024);
        }
        if let Some(keep) = self.keep_files {
            settings.keep_files = keep;
        }
        if let Some(size) = self.workers.size {
            settings.workers = size;
        }

        let lifecycle = &self.lifecycle;
        let secs = Duration::from_secs;
        if let Some(v) = lifecycle.processing_timeout_secs {
            settings.processing_timeout = secs(v);
        }
        if let Some(v) = lifecycle.recovery_interval_secs {
            settings.recovery_interval = secs(v);
        }
        if let Some(v) = lifecycle.recovery_grace_secs {
            settings.recovery_grace = secs(v);
        }
        if let Some(v) = lifecycle.retention_interval_secs {
            settings.retention_interval = secs(v);
        }
        if let Some(v) = lifecycle.retention_window_secs {
            settings.retention_window = secs(v);
        }
        if let Some(v) = lifecycle.max_tasks {
            settings.max_tasks = v;
        }

        if let Some(ref analyzer) = self.analyzer {
            settings.analyzer = analyzer.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory (--data flag).
    pub data: Option<PathBuf>,
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

/// Apply `DOCSIFT_*` overrides. `lookup` is `std::env::var` in production.
pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let var = |name: &str| lookup(name).filter(|s| !s.is_empty());

    if let Some(dir) = var("DOCSIFT_DATA_DIR") {
        tracing::debug!("Using DOCSIFT_DATA_DIR from environment: {}", dir);
        settings.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
    if let Some(bind) = var("DOCSIFT_BIND") {
        settings.bind = bind;
    }
    if let Some(workers) = var("DOCSIFT_WORKERS") {
        settings.workers = parse_env("DOCSIFT_WORKERS", workers)?;
    }
    if let Some(timeout) = var("DOCSIFT_PROCESSING_TIMEOUT_SECS") {
        settings.processing_timeout =
            Duration::from_secs(parse_env("DOCSIFT_PROCESSING_TIMEOUT_SECS", timeout)?);
    }
    if let Some(command) = var("DOCSIFT_ANALYZER_COMMAND") {
        settings.analyzer.command = command;
    }
    Ok(())
}

async fn load_file_config(options: &LoadOptions) -> Result<Config, ConfigError> {
    // Explicit --config must exist and parse.
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path).await;
    }
    Config::load().await
}

/// Load settings with explicit options. Returns `(Settings, Config)`.
///
/// The settings are not validated here; callers that start the service call
/// [`Settings::validate`].
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let config = load_file_config(&options).await?;
    let mut settings = Settings::default();

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd.clone()
    } else {
        config.base_dir().unwrap_or_else(|| cwd.clone())
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --data takes precedence over the config file.
    if let Some(ref data) = options.data {
        settings.data_dir = config.resolve_path(&data.to_string_lossy(), &cwd);
    }

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;

    Ok((settings, config))
}

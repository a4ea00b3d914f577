//! Configuration for voxinvoice.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOXINVOICE_HOME, VOXINVOICE_API_URL, VOXINVOICE_TOKEN)
//! 2. Config file (.voxinvoice/config.yaml)
//! 3. Defaults (~/.voxinvoice)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voxinvoice/config.yaml
//! - `paths.home` is relative to the .voxinvoice/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub mod paths;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub capture: Option<CaptureConfig>,
    #[serde(default)]
    pub jobs: Option<JobsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .voxinvoice/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub arming_delay_ms: Option<u64>,
    pub min_duration_ms: Option<u64>,
    pub cancel_distance: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub recent_limit: Option<usize>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// REST endpoint and credentials
    pub api: ApiSettings,
    /// Gesture timing and thresholds
    pub capture: CaptureSettings,
    /// Recent-jobs list settings
    pub jobs: JobSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Pause between successful setup and device start
    pub arming_delay_ms: u64,
    /// Recordings shorter than this are discarded
    pub min_duration_ms: u64,
    /// Gesture displacement that turns a release into a cancel
    pub cancel_distance: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            arming_delay_ms: 150,
            min_duration_ms: 500,
            cancel_distance: 80.0,
        }
    }
}

impl CaptureSettings {
    pub fn arming_delay(&self) -> Duration {
        Duration::from_millis(self.arming_delay_ms)
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Maximum number of jobs kept in the recent list
    pub recent_limit: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self { recent_limit: 3 }
    }
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every other setting at its default
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            config_file: None,
            api: ApiSettings::default(),
            capture: CaptureSettings::default(),
            jobs: JobSettings::default(),
        }
    }

    /// App-private directory holding cached documents
    pub fn documents_dir(&self) -> PathBuf {
        self.home.join("documents")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".voxinvoice").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn apply_config_file(resolved: &mut ResolvedConfig, config: ConfigFile, config_dir: &Path) {
    if let Some(ref home_path) = config.paths.home {
        resolved.home = resolve_path(config_dir, home_path);
    }

    if let Some(api) = config.api {
        if let Some(base_url) = api.base_url {
            resolved.api.base_url = base_url;
        }
        resolved.api.token = api.token.or(resolved.api.token.take());
    }

    if let Some(capture) = config.capture {
        let defaults = CaptureSettings::default();
        resolved.capture = CaptureSettings {
            arming_delay_ms: capture.arming_delay_ms.unwrap_or(defaults.arming_delay_ms),
            min_duration_ms: capture.min_duration_ms.unwrap_or(defaults.min_duration_ms),
            cancel_distance: capture.cancel_distance.unwrap_or(defaults.cancel_distance),
        };
    }

    if let Some(limit) = config.jobs.and_then(|j| j.recent_limit) {
        // A zero bound would drop every job on insertion
        resolved.jobs.recent_limit = limit.max(1);
    }
}

/// Environment variables win over the config file
fn apply_env(resolved: &mut ResolvedConfig) {
    if let Ok(home) = std::env::var("VOXINVOICE_HOME") {
        resolved.home = PathBuf::from(home);
    }
    if let Ok(url) = std::env::var("VOXINVOICE_API_URL") {
        resolved.api.base_url = url;
    }
    if let Ok(token) = std::env::var("VOXINVOICE_TOKEN") {
        resolved.api.token = Some(token);
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".voxinvoice");

    let mut resolved = ResolvedConfig::with_home(default_home);

    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        apply_config_file(&mut resolved, config, config_dir);
        resolved.config_file = Some(config_path);
    }

    apply_env(&mut resolved);

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the cached documents directory ($VOXINVOICE_HOME/documents)
pub fn documents_dir() -> Result<PathBuf> {
    Ok(config()?.documents_dir())
}

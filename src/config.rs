//! Configuration for auditbatch.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI on top of this module)
//! 2. Environment variables (AUDITBATCH_HOME, AUDITBATCH_CACHE_DIR)
//! 3. Config file (.auditbatch/config.yaml)
//! 4. Defaults (~/.auditbatch)
//!
//! Config file discovery:
//! - Searches current directory and parents for .auditbatch/config.yaml
//! - `paths.home` is relative to the .auditbatch/ directory; `paths.cache`
//!   and `paths.output` are relative to the project root holding it

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{BatchLimits, RetryPolicy};
use crate::domain::{
    JobOptions, OutputFormat, ScreenshotOptions, DEFAULT_FLAKY_AUDITS, KNOWN_CATEGORIES,
};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".auditbatch";
const HOME_ENV: &str = "AUDITBATCH_HOME";
const CACHE_DIR_ENV: &str = "AUDITBATCH_CACHE_DIR";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
    #[serde(default)]
    pub screenshot: Option<ScreenshotConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .auditbatch/)
    pub home: Option<String>,
    /// Result cache directory (relative to project root)
    pub cache: Option<String>,
    /// Report/screenshot directory (relative to project root)
    pub output: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_concurrent: Option<usize>,
    pub max_retries: Option<u32>,
    pub cache_duration_seconds: Option<u64>,
    pub attempt_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub categories: Option<Vec<String>>,
    pub output_format: Option<OutputFormat>,
    pub lighthouse_binary: Option<String>,
    pub flaky_audits: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotConfig {
    pub enabled: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub full_page: Option<bool>,
    pub chrome_binary: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to auditbatch home (state)
    pub home: PathBuf,
    /// Result cache directory
    pub cache_dir: PathBuf,
    /// Report and screenshot output directory
    pub output_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: LimitSettings,
    pub audit: AuditSettings,
    pub screenshot: ScreenshotSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitSettings {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub cache_duration_seconds: u64,
    pub attempt_timeout_seconds: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 2,
            cache_duration_seconds: 24 * 60 * 60,
            attempt_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSettings {
    pub categories: Vec<String>,
    pub output_format: OutputFormat,
    pub lighthouse_binary: String,
    pub flaky_audits: Vec<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            categories: KNOWN_CATEGORIES[..4].iter().map(|c| c.to_string()).collect(),
            output_format: OutputFormat::default(),
            lighthouse_binary: "lighthouse".to_string(),
            flaky_audits: DEFAULT_FLAKY_AUDITS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreenshotSettings {
    pub options: ScreenshotOptions,
    pub chrome_binary: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Job options described by this configuration
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            categories: self.audit.categories.clone(),
            output_format: self.audit.output_format,
            output_dir: self.output_dir.clone(),
            flaky_audits: self.audit.flaky_audits.iter().cloned().collect(),
            screenshot: self.screenshot.options.clone(),
            retry: RetryPolicy {
                max_retries: self.limits.max_retries,
                attempt_timeout_ms: self.limits.attempt_timeout_seconds.saturating_mul(1000),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Batch limits described by this configuration
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_concurrent: self.limits.max_concurrent,
            max_retries: self.limits.max_retries,
            cache_duration: Duration::from_secs(self.limits.cache_duration_seconds),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
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

/// Resolve a path that may be relative to the config file's parent
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

/// Combine an optional config file with environment lookups and defaults
fn build_config(
    config_file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config_path, file) = match config_file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    // .auditbatch/ and the project root above it
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = if let Some(env_home) = env(HOME_ENV) {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let cache_dir = if let Some(env_cache) = env(CACHE_DIR_ENV) {
        PathBuf::from(env_cache)
    } else if let Some(ref cache_path) = paths.cache {
        resolve_path(base_dir, cache_path)
    } else {
        home.join("cache")
    };

    let output_dir = paths
        .output
        .as_deref()
        .map(|output| resolve_path(base_dir, output))
        .unwrap_or_else(|| home.join("reports"));

    let mut limits = LimitSettings::default();
    if let Some(l) = file.as_ref().and_then(|f| f.limits.as_ref()) {
        limits.max_concurrent = l.max_concurrent.unwrap_or(limits.max_concurrent);
        limits.max_retries = l.max_retries.unwrap_or(limits.max_retries);
        limits.cache_duration_seconds = l
            .cache_duration_seconds
            .unwrap_or(limits.cache_duration_seconds);
        limits.attempt_timeout_seconds = l
            .attempt_timeout_seconds
            .unwrap_or(limits.attempt_timeout_seconds);
    }

    if limits.max_concurrent == 0 {
        anyhow::bail!("limits.max_concurrent must be at least 1");
    }

    let mut audit = AuditSettings::default();
    if let Some(a) = file.as_ref().and_then(|f| f.audit.as_ref()) {
        if let Some(ref categories) = a.categories {
            audit.categories = categories.clone();
        }
        audit.output_format = a.output_format.unwrap_or(audit.output_format);
        if let Some(ref binary) = a.lighthouse_binary {
            audit.lighthouse_binary = binary.clone();
        }
        if let Some(ref flaky) = a.flaky_audits {
            audit.flaky_audits = flaky.clone();
        }
    }

    let mut screenshot = ScreenshotSettings::default();
    if let Some(s) = file.as_ref().and_then(|f| f.screenshot.as_ref()) {
        let options = &mut screenshot.options;
        options.enabled = s.enabled.unwrap_or(options.enabled);
        options.width = s.width.unwrap_or(options.width);
        options.height = s.height.unwrap_or(options.height);
        options.full_page = s.full_page.unwrap_or(options.full_page);
        screenshot.chrome_binary = s.chrome_binary.as_deref().map(PathBuf::from);
    }

    Ok(ResolvedConfig {
        home,
        cache_dir,
        output_dir,
        config_file: config_path,
        limits,
        audit,
        screenshot,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    build_config(config_file, |name| std::env::var(name).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

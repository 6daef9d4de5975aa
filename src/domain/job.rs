//! Job identity and options.
//!
//! A job is one audit (plus optional screenshot) of one target under one
//! options set. Jobs that derive the same `JobKey` are interchangeable.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::JobError;
use crate::core::retry::RetryPolicy;

/// Audit categories understood by the auditor
pub const KNOWN_CATEGORIES: &[&str] = &[
    "performance",
    "accessibility",
    "best-practices",
    "seo",
    "pwa",
];

/// Audits that are skipped once a job's policy has been relaxed
pub const DEFAULT_FLAKY_AUDITS: &[&str] = &[
    "full-page-screenshot",
    "screenshot-thumbnails",
    "final-screenshot",
    "largest-contentful-paint-element",
];

/// The unit under test: a normalized URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Parse user input into a target, defaulting the scheme to https
    pub fn parse(input: &str) -> Result<Self, JobError> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(JobError::Configuration("target cannot be empty".to_string()));
        }

        if trimmed.chars().any(char::is_whitespace) {
            return Err(JobError::Configuration(format!(
                "target contains whitespace: '{}'",
                trimmed
            )));
        }

        let url = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name for artifacts
    pub fn slug(&self) -> String {
        let without_scheme = self
            .0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0);

        let slug: String = without_scheme
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        slug.trim_matches('_').to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a target list: one target per line, `#` comments and blank lines ignored
pub fn parse_target_list(content: &str) -> Result<Vec<Target>, JobError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Target::parse)
        .collect()
}

/// When a page load counts as finished
///
/// Ordered from strictest to loosest; relaxation only ever moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Wait until the network has gone quiet
    #[default]
    NetworkIdle,

    /// Accept the page as soon as it has painted
    FirstPaint,
}

/// Format of the report artifact the auditor writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Html,
}

/// Screenshot parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_full_page")]
    pub full_page: bool,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    800
}
fn default_full_page() -> bool {
    true
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            width: default_width(),
            height: default_height(),
            full_page: default_full_page(),
        }
    }
}

/// Immutable configuration bundle passed by value into every job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Audit categories to score
    pub categories: Vec<String>,

    /// Report artifact format
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Directory receiving report and screenshot artifacts
    pub output_dir: PathBuf,

    /// Initial page-load completion condition
    #[serde(default)]
    pub wait_condition: WaitCondition,

    /// Audits skipped on every attempt
    #[serde(default)]
    pub skip_audits: BTreeSet<String>,

    /// Audits additionally skipped once the policy is relaxed
    #[serde(default)]
    pub flaky_audits: BTreeSet<String>,

    #[serde(default)]
    pub screenshot: ScreenshotOptions,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            categories: KNOWN_CATEGORIES[..4].iter().map(|c| c.to_string()).collect(),
            output_format: OutputFormat::default(),
            output_dir: PathBuf::from("reports"),
            wait_condition: WaitCondition::default(),
            skip_audits: BTreeSet::new(),
            flaky_audits: DEFAULT_FLAKY_AUDITS.iter().map(|a| a.to_string()).collect(),
            screenshot: ScreenshotOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl JobOptions {
    /// Reject malformed options before any external resource is touched
    pub fn validate(&self) -> Result<(), JobError> {
        if self.categories.is_empty() {
            return Err(JobError::Configuration(
                "at least one audit category is required".to_string(),
            ));
        }

        for category in &self.categories {
            if !KNOWN_CATEGORIES.contains(&category.as_str()) {
                return Err(JobError::Configuration(format!(
                    "unknown audit category '{}'",
                    category
                )));
            }
        }

        if self.screenshot.enabled && (self.screenshot.width == 0 || self.screenshot.height == 0) {
            return Err(JobError::Configuration(format!(
                "screenshot dimensions must be non-zero (got {}x{})",
                self.screenshot.width, self.screenshot.height
            )));
        }

        self.retry.validate()
    }

    /// The subset of options that changes what a job produces
    pub fn fingerprint(&self) -> OptionsFingerprint {
        let categories: BTreeSet<String> = self.categories.iter().cloned().collect();

        OptionsFingerprint {
            categories: categories.into_iter().collect(),
            output_format: self.output_format,
            output_dir: self.output_dir.to_string_lossy().to_string(),
            wait_condition: self.wait_condition,
            skip_audits: self.skip_audits.iter().cloned().collect(),
            screenshot: self.screenshot.clone(),
        }
    }
}

/// Result-affecting options, in canonical order
///
/// Retry, backoff and timeout settings are deliberately absent: they change
/// how a job is scheduled, not what it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionsFingerprint {
    pub categories: Vec<String>,
    pub output_format: OutputFormat,
    pub output_dir: String,
    pub wait_condition: WaitCondition,
    pub skip_audits: Vec<String>,
    pub screenshot: ScreenshotOptions,
}

/// Everything a `JobKey` digest is computed from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub target: Target,
    pub fingerprint: OptionsFingerprint,
}

impl KeyDescriptor {
    /// SHA256 over the canonical JSON encoding (hex, 64 chars)
    fn digest(&self) -> String {
        // Struct fields serialize in declaration order and every list is
        // pre-sorted, so equal descriptors always encode to equal bytes.
        let canonical = serde_json::to_vec(self)
            .unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Cache and in-flight identity of a job
///
/// Equality and hashing use the digest only; the descriptor rides along so
/// the cache can detect digest collisions.
#[derive(Debug, Clone)]
pub struct JobKey {
    digest: String,
    descriptor: KeyDescriptor,
}

impl JobKey {
    /// Derive the key for a target under the given options
    pub fn derive(target: &Target, options: &JobOptions) -> Self {
        let descriptor = KeyDescriptor {
            target: target.clone(),
            fingerprint: options.fingerprint(),
        };

        Self {
            digest: descriptor.digest(),
            descriptor,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }

    pub fn descriptor(&self) -> &KeyDescriptor {
        &self.descriptor
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.digest[..12]
    }
}

impl PartialEq for JobKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for JobKey {}

impl Hash for JobKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

impl Serialize for JobKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.digest)
    }
}

//! Collaborator interfaces for the audit and screenshot engines.
//!
//! The orchestration core only talks to these traits; the concrete
//! implementations drive Lighthouse and a headless Chrome.

pub mod lighthouse;
pub mod screenshot;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::core::retry::AttemptPolicy;
use crate::domain::{JobError, JobOptions, ScreenshotOptions, Target};

// Re-export the concrete collaborators
pub use lighthouse::LighthouseAuditor;
pub use screenshot::ChromeScreenshotter;

/// Output from one audit run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditOutput {
    /// category -> score (0-100)
    pub scores: BTreeMap<String, f64>,

    /// Path of the report written by the auditor (if any)
    pub report_artifact: Option<String>,

    /// Named numeric metrics (milliseconds, unitless shift scores, ...)
    pub metrics: BTreeMap<String, f64>,
}

impl AuditOutput {
    /// Create an output with just scores
    pub fn new(scores: BTreeMap<String, f64>) -> Self {
        Self {
            scores,
            report_artifact: None,
            metrics: BTreeMap::new(),
        }
    }
}

/// Audit engine producing category scores for a target
#[async_trait]
pub trait Auditor: Send + Sync {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Audit `target`.
    ///
    /// `policy` carries the attempt's (possibly relaxed) wait condition and
    /// skipped audits; it takes precedence over the equivalent `options`
    /// fields.
    async fn run_audit(
        &self,
        target: &Target,
        options: &JobOptions,
        policy: &AttemptPolicy,
    ) -> Result<AuditOutput, JobError>;

    /// Check that the engine is installed and runnable
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Rendering engine producing an image of a target
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Capture `target` into `output`, returning where the image was written
    async fn capture(
        &self,
        target: &Target,
        output: &Path,
        options: &ScreenshotOptions,
        policy: &AttemptPolicy,
    ) -> Result<PathBuf, JobError>;
}

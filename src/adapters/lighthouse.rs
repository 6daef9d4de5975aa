//! Lighthouse auditor.
//!
//! Spawns the `lighthouse` CLI once per attempt and reads category scores
//! back from its JSON report. The child is killed if the attempt future is
//! dropped, so a timed-out attempt never leaves a browser behind.

use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{AuditOutput, Auditor};
use crate::core::retry::AttemptPolicy;
use crate::domain::{
    classify_navigation_error, JobError, JobOptions, OutputFormat, Target, WaitCondition,
};

/// Page-load budget handed to Lighthouse once the wait condition is relaxed
const RELAXED_MAX_WAIT_MS: u64 = 15_000;

/// Audits whose numeric values are copied into `AuditOutput::metrics`
const METRIC_AUDITS: &[&str] = &[
    "first-contentful-paint",
    "largest-contentful-paint",
    "speed-index",
    "total-blocking-time",
    "cumulative-layout-shift",
    "interactive",
];

const NAVIGATION_CODES: &[&str] = &["PAGE_HUNG", "NO_FCP", "NO_NAVSTART", "NO_LCP"];
const PERMANENT_CODES: &[&str] = &[
    "DNS_FAILURE",
    "INVALID_URL",
    "FAILED_DOCUMENT_REQUEST",
    "ERRORED_DOCUMENT_REQUEST",
    "NOT_HTML",
    "INSECURE_DOCUMENT_REQUEST",
];
const RESOURCE_MARKERS: &[&str] = &[
    "Unable to connect to Chrome",
    "ECONNREFUSED",
    "Chrome prevented page load",
    "PROTOCOL_TIMEOUT",
];

/// Lighthouse CLI auditor
#[derive(Debug, Clone)]
pub struct LighthouseAuditor {
    /// Path to the lighthouse binary (default: "lighthouse")
    binary_path: String,

    /// Value of `--chrome-flags`
    chrome_flags: String,
}

impl Default for LighthouseAuditor {
    fn default() -> Self {
        Self::new()
    }
}

impl LighthouseAuditor {
    pub fn new() -> Self {
        Self::with_binary_path("lighthouse")
    }

    /// Create an auditor with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            chrome_flags: "--headless=new --no-sandbox".to_string(),
        }
    }

    /// Command-line arguments for one attempt
    fn build_args(
        &self,
        target: &Target,
        options: &JobOptions,
        policy: &AttemptPolicy,
        output_path: &Path,
    ) -> Vec<String> {
        let mut args = vec![target.as_str().to_string(), "--output=json".to_string()];

        if options.output_format == OutputFormat::Html {
            args.push("--output=html".to_string());
        }

        args.push(format!("--output-path={}", output_path.display()));
        args.push(format!("--only-categories={}", options.categories.join(",")));
        args.push(format!("--chrome-flags={}", self.chrome_flags));
        args.push("--quiet".to_string());

        if !policy.skip_audits.is_empty() {
            let skipped: Vec<&str> = policy.skip_audits.iter().map(String::as_str).collect();
            args.push(format!("--skip-audits={}", skipped.join(",")));
        }

        if policy.wait_condition == WaitCondition::FirstPaint {
            args.push(format!("--max-wait-for-load={}", RELAXED_MAX_WAIT_MS));
        }

        args
    }
}

/// Where Lighthouse writes its reports for `target`.
///
/// Returns `(--output-path value, JSON report, artifact to reference)`.
/// With more than one output Lighthouse appends `.report.<ext>` to the path.
fn report_paths(target: &Target, options: &JobOptions) -> (PathBuf, PathBuf, PathBuf) {
    let dir = &options.output_dir;
    let slug = target.slug();

    match options.output_format {
        OutputFormat::Json => {
            let json = dir.join(format!("{}.json", slug));
            (json.clone(), json.clone(), json)
        }
        OutputFormat::Html => (
            dir.join(&slug),
            dir.join(format!("{}.report.json", slug)),
            dir.join(format!("{}.report.html", slug)),
        ),
    }
}

/// Map Lighthouse's stderr (or runtime error code) onto the job error taxonomy
pub fn classify_failure(stderr: &str) -> JobError {
    let message = stderr.trim().to_string();

    if PERMANENT_CODES.iter().any(|code| stderr.contains(code)) {
        return JobError::PermanentTarget(message);
    }

    if NAVIGATION_CODES.iter().any(|code| stderr.contains(code)) {
        return JobError::NavigationTimeout(message);
    }

    if RESOURCE_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        return JobError::ResourceExhaustion(message);
    }

    if stderr.contains("No Chrome installations found") {
        return JobError::Configuration(message);
    }

    classify_navigation_error(&message)
}

/// Extract category scores (0-100) and metrics from a JSON report
pub fn parse_report(report: &Value) -> Result<AuditOutput, JobError> {
    if let Some(runtime_error) = report.get("runtimeError") {
        let code = runtime_error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        let message = runtime_error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(classify_failure(&format!("{}: {}", code, message)));
    }

    let categories = report
        .get("categories")
        .and_then(Value::as_object)
        .ok_or_else(|| JobError::TransientAudit("report has no categories".to_string()))?;

    // Null scores mean the category could not be computed; leave it out
    let scores: BTreeMap<String, f64> = categories
        .iter()
        .filter_map(|(id, category)| {
            let score = category.get("score").and_then(Value::as_f64)?;
            Some((id.clone(), (score * 100.0).round()))
        })
        .collect();

    let metrics = METRIC_AUDITS
        .iter()
        .filter_map(|audit| {
            let value = report
                .get("audits")?
                .get(*audit)?
                .get("numericValue")?
                .as_f64()?;
            Some((audit.to_string(), value))
        })
        .collect();

    Ok(AuditOutput {
        scores,
        report_artifact: None,
        metrics,
    })
}

#[async_trait]
impl Auditor for LighthouseAuditor {
    fn name(&self) -> &str {
        "lighthouse"
    }

    async fn run_audit(
        &self,
        target: &Target,
        options: &JobOptions,
        policy: &AttemptPolicy,
    ) -> Result<AuditOutput, JobError> {
        tokio::fs::create_dir_all(&options.output_dir)
            .await
            .map_err(|e| {
                JobError::Configuration(format!(
                    "cannot create output directory {}: {}",
                    options.output_dir.display(),
                    e
                ))
            })?;

        let (output_path, json_path, artifact_path) = report_paths(target, options);
        let args = self.build_args(target, options, policy, &output_path);
        debug!(binary = %self.binary_path, ?args, "Spawning lighthouse");

        let output = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                IoErrorKind::NotFound => JobError::Configuration(format!(
                    "lighthouse binary '{}' not found",
                    self.binary_path
                )),
                _ => JobError::ResourceExhaustion(format!("failed to spawn lighthouse: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(exit_code, "Lighthouse exited with failure");
            return Err(classify_failure(&stderr));
        }

        let raw = tokio::fs::read(&json_path).await.map_err(|e| {
            JobError::TransientAudit(format!(
                "lighthouse report missing at {}: {}",
                json_path.display(),
                e
            ))
        })?;
        let report: Value = serde_json::from_slice(&raw).map_err(|e| {
            JobError::TransientAudit(format!("lighthouse report is not valid JSON: {}", e))
        })?;

        let mut audit = parse_report(&report)?;
        audit.report_artifact = Some(artifact_path.to_string_lossy().to_string());
        Ok(audit)
    }

    async fn health_check(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .context("Failed to run lighthouse health check")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Lighthouse health check failed: {}", stderr);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::parse("a.example").unwrap()
    }

    #[test]
    fn test_custom_binary_path() {
        let auditor = LighthouseAuditor::with_binary_path("/opt/lighthouse/cli.js");
        assert_eq!(auditor.binary_path, "/opt/lighthouse/cli.js");
        assert_eq!(auditor.name(), "lighthouse");
    }

    #[test]
    fn test_args_follow_policy() {
        let auditor = LighthouseAuditor::new();
        let options = JobOptions::default();
        let mut policy = AttemptPolicy::from_options(&options);
        let path = PathBuf::from("reports/a");

        let strict = auditor.build_args(&target(), &options, &policy, &path);
        assert_eq!(strict[0], "https://a.example");
        assert!(strict.contains(&"--only-categories=performance,accessibility,best-practices,seo".to_string()));
        assert!(!strict.iter().any(|a| a.starts_with("--max-wait-for-load")));
        assert!(!strict.iter().any(|a| a.starts_with("--skip-audits")));

        policy.relax(&options.flaky_audits);
        let relaxed = auditor.build_args(&target(), &options, &policy, &path);
        assert!(relaxed.contains(&"--max-wait-for-load=15000".to_string()));
        assert!(relaxed.iter().any(|a| a.starts_with("--skip-audits=")));
    }

    #[test]
    fn test_report_paths_by_format() {
        let mut options = JobOptions {
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };

        let (arg, json, artifact) = report_paths(&target(), &options);
        assert_eq!(arg, json);
        assert_eq!(json, artifact);
        assert_eq!(json, PathBuf::from("out/a.example.json"));

        options.output_format = OutputFormat::Html;
        let (arg, json, artifact) = report_paths(&target(), &options);
        assert_eq!(arg, PathBuf::from("out/a.example"));
        assert!(json.to_string_lossy().ends_with(".report.json"));
        assert!(artifact.to_string_lossy().ends_with(".report.html"));
    }

    #[test]
    fn test_parse_report_scores_and_metrics() {
        let report = json!({
            "categories": {
                "performance": {"id": "performance", "score": 0.914},
                "seo": {"id": "seo", "score": 1.0},
                "pwa": {"id": "pwa", "score": null}
            },
            "audits": {
                "first-contentful-paint": {"numericValue": 812.5},
                "cumulative-layout-shift": {"numericValue": 0.02}
            }
        });

        let output = parse_report(&report).unwrap();
        assert_eq!(output.scores.get("performance"), Some(&91.0));
        assert_eq!(output.scores.get("seo"), Some(&100.0));
        assert!(!output.scores.contains_key("pwa"));
        assert_eq!(output.metrics.get("first-contentful-paint"), Some(&812.5));
        assert_eq!(output.metrics.len(), 2);
    }

    #[test]
    fn test_runtime_error_is_classified() {
        let hung = json!({"runtimeError": {"code": "PAGE_HUNG", "message": "page hung"}});
        assert!(matches!(parse_report(&hung), Err(JobError::NavigationTimeout(_))));

        let dns = json!({"runtimeError": {"code": "DNS_FAILURE", "message": "dns"}});
        assert!(matches!(parse_report(&dns), Err(JobError::PermanentTarget(_))));
    }

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify_failure("Runtime error encountered: NO_FCP"),
            JobError::NavigationTimeout(_)
        ));
        assert!(matches!(
            classify_failure("Unable to connect to Chrome"),
            JobError::ResourceExhaustion(_)
        ));
        assert!(matches!(
            classify_failure("No Chrome installations found."),
            JobError::Configuration(_)
        ));
        assert!(matches!(
            classify_failure("net::ERR_NAME_NOT_RESOLVED"),
            JobError::PermanentTarget(_)
        ));
        assert!(matches!(
            classify_failure("something odd happened"),
            JobError::TransientAudit(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_configuration_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let auditor = LighthouseAuditor::with_binary_path("/nonexistent/lighthouse-binary");
        let options = JobOptions {
            output_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        let policy = AttemptPolicy::from_options(&options);

        let result = auditor.run_audit(&target(), &options, &policy).await;
        assert!(matches!(result, Err(JobError::Configuration(_))));
        assert!(auditor.health_check().await.is_err());
    }
}

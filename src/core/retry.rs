//! Bounded-retry execution of a single job.
//!
//! Each job moves through `Pending -> Running -> {Succeeded, Retrying,
//! Failed}`, with `Retrying` looping back to `Running` after a backoff
//! delay. Recognized timeout failures relax the job's private
//! `AttemptPolicy` before the next attempt. The executor never returns an
//! error: every path ends in a `JobResult`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{Auditor, ScreenshotCapturer};
use crate::domain::{JobError, JobOptions, JobResult, Target, WaitCondition};

/// How delays grow between retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// initial * retry
    Linear,

    /// initial * 2^(retry - 1)
    #[default]
    Exponential,
}

/// Retry budget, backoff and per-attempt deadline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Deadline for a single attempt in milliseconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_attempt_timeout() -> u64 {
    120_000
} // 2 min

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff: Backoff::default(),
            attempt_timeout_ms: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed). Never decreases as
    /// `retry` grows.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let retry = retry.max(1);

        let factor = match self.backoff {
            Backoff::Linear => u64::from(retry),
            Backoff::Exponential => 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX),
        };

        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.attempt_timeout_ms == 0 {
            return Err(JobError::Configuration(
                "attempt timeout must be greater than zero".to_string(),
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(JobError::Configuration(format!(
                "initial retry delay ({}ms) exceeds maximum delay ({}ms)",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }

        Ok(())
    }
}

/// Per-job execution conditions, relaxed monotonically across attempts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub wait_condition: WaitCondition,
    pub skip_audits: BTreeSet<String>,
    relaxations: u32,
}

impl AttemptPolicy {
    pub fn from_options(options: &JobOptions) -> Self {
        Self {
            wait_condition: options.wait_condition,
            skip_audits: options.skip_audits.clone(),
            relaxations: 0,
        }
    }

    /// Loosen the wait condition and skip `flaky_audits`.
    ///
    /// Returns whether anything changed. Never makes the policy stricter.
    pub fn relax(&mut self, flaky_audits: &BTreeSet<String>) -> bool {
        let before = (self.wait_condition, self.skip_audits.len());

        self.wait_condition = self.wait_condition.max(WaitCondition::FirstPaint);
        self.skip_audits.extend(flaky_audits.iter().cloned());

        let changed = before != (self.wait_condition, self.skip_audits.len());
        if changed {
            self.relaxations += 1;
        }
        changed
    }

    pub fn is_relaxed(&self) -> bool {
        self.relaxations > 0
    }
}

/// Retry state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running { attempt } => write!(f, "running (attempt {})", attempt),
            Self::Retrying { attempt, delay } => {
                write!(f, "retrying after attempt {} in {:?}", attempt, delay)
            }
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What the executor produced for one job
#[derive(Debug, Clone)]
pub struct ExecutorRun {
    pub result: JobResult,

    /// Attempts made (0 when options were rejected up front)
    pub attempts: u32,

    /// Every state the job passed through, in order
    pub history: Vec<JobState>,

    /// Policy in force for the last attempt
    pub final_policy: AttemptPolicy,
}

struct AttemptOutput {
    scores: std::collections::BTreeMap<String, f64>,
    artifact_refs: Vec<String>,
}

/// Runs jobs against the collaborators with bounded retries
pub struct RetryExecutor {
    auditor: Arc<dyn Auditor>,
    screenshotter: Option<Arc<dyn ScreenshotCapturer>>,
}

impl RetryExecutor {
    pub fn new(auditor: Arc<dyn Auditor>) -> Self {
        Self {
            auditor,
            screenshotter: None,
        }
    }

    pub fn with_screenshotter(mut self, screenshotter: Arc<dyn ScreenshotCapturer>) -> Self {
        self.screenshotter = Some(screenshotter);
        self
    }

    /// Run one job to completion
    #[instrument(skip_all, fields(target = %target))]
    pub async fn run(&self, target: &Target, options: &JobOptions) -> ExecutorRun {
        let retry = &options.retry;
        let mut policy = AttemptPolicy::from_options(options);
        let mut history = vec![JobState::Pending];

        if let Err(e) = options.validate() {
            error!(error = %e, "Rejected job options");
            history.push(JobState::Failed);
            return ExecutorRun {
                result: JobResult::failure(&e),
                attempts: 0,
                history,
                final_policy: policy,
            };
        }

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            history.push(JobState::Running { attempt });
            debug!(
                attempt,
                max_attempts = retry.total_attempts(),
                wait = ?policy.wait_condition,
                "Starting attempt"
            );

            // Dropping the attempt future on timeout drops whatever resource it holds
            let outcome = match timeout(
                retry.attempt_timeout(),
                self.attempt(target, options, &policy),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(JobError::AttemptTimeout(retry.attempt_timeout())),
            };

            match outcome {
                Ok(output) => {
                    history.push(JobState::Succeeded);
                    info!(attempt, relaxed = policy.is_relaxed(), "Job succeeded");

                    return ExecutorRun {
                        result: JobResult::success(output.scores, output.artifact_refs),
                        attempts: attempt,
                        history,
                        final_policy: policy,
                    };
                }
                Err(e) if e.is_retryable() && retry.should_retry(attempt) => {
                    let delay = retry.delay_for_retry(attempt);

                    if e.relaxes_policy() && policy.relax(&options.flaky_audits) {
                        info!(
                            attempt,
                            wait = ?policy.wait_condition,
                            skipped = policy.skip_audits.len(),
                            "Relaxing execution policy for next attempt"
                        );
                    }

                    history.push(JobState::Retrying { attempt, delay });
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );

                    sleep(delay).await;
                }
                Err(e) => {
                    history.push(JobState::Failed);
                    error!(
                        attempt,
                        kind = %e.kind(),
                        error = %e,
                        "Job failed permanently"
                    );

                    return ExecutorRun {
                        result: JobResult::failure(&e),
                        attempts: attempt,
                        history,
                        final_policy: policy,
                    };
                }
            }
        }
    }

    /// One audit (+ screenshot) attempt
    async fn attempt(
        &self,
        target: &Target,
        options: &JobOptions,
        policy: &AttemptPolicy,
    ) -> Result<AttemptOutput, JobError> {
        let audit = self.auditor.run_audit(target, options, policy).await?;

        let mut artifact_refs = Vec::new();
        if let Some(report) = audit.report_artifact {
            artifact_refs.push(report);
        }

        if options.screenshot.enabled {
            match &self.screenshotter {
                Some(screenshotter) => {
                    let path = options
                        .output_dir
                        .join(format!("{}.png", target.slug()));
                    let saved = screenshotter
                        .capture(target, &path, &options.screenshot, policy)
                        .await?;
                    artifact_refs.push(saved.to_string_lossy().to_string());
                }
                None => {
                    warn!("Screenshots requested but no screenshot engine configured");
                }
            }
        }

        Ok(AttemptOutput {
            scores: audit.scores,
            artifact_refs,
        })
    }
}

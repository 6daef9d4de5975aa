//! Shared fixtures for integration tests: scripted collaborators and
//! fast-retry options.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use auditbatch::core::{AttemptPolicy, BlobStore, RetryPolicy, StoreError};
use auditbatch::domain::{JobError, JobOptions, ScreenshotOptions, Target};
use auditbatch::{AuditOutput, Auditor, ScreenshotCapturer};

/// Parse a target, panicking on bad input
pub fn target(input: &str) -> Target {
    Target::parse(input).unwrap()
}

/// Options with millisecond backoff so retry tests stay fast
pub fn fast_options(output_dir: &Path) -> JobOptions {
    JobOptions {
        output_dir: output_dir.to_path_buf(),
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            attempt_timeout_ms: 5_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Auditor whose behavior per target is scripted up front
pub struct ScriptedAuditor {
    default_scores: BTreeMap<String, f64>,
    scores: HashMap<String, BTreeMap<String, f64>>,
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failures: HashMap<String, (u32, JobError)>,
    calls: Mutex<HashMap<String, u32>>,
    policies: Mutex<Vec<AttemptPolicy>>,
    total: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAuditor {
    pub fn new() -> Self {
        Self {
            default_scores: BTreeMap::from([
                ("performance".to_string(), 90.0),
                ("accessibility".to_string(), 95.0),
            ]),
            scores: HashMap::new(),
            default_delay: Duration::from_millis(5),
            delays: HashMap::new(),
            failures: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            policies: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn delay_for(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(self::target(target).to_string(), delay);
        self
    }

    pub fn scores_for(mut self, target: &str, scores: &[(&str, f64)]) -> Self {
        self.scores.insert(
            self::target(target).to_string(),
            scores.iter().map(|(c, s)| (c.to_string(), *s)).collect(),
        );
        self
    }

    /// Fail the first `times` calls for `target` with `error`
    pub fn fail_first(mut self, target: &str, times: u32, error: JobError) -> Self {
        self.failures
            .insert(self::target(target).to_string(), (times, error));
        self
    }

    pub fn always_fail(self, target: &str, error: JobError) -> Self {
        self.fail_first(target, u32::MAX, error)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, target: &str) -> u32 {
        let key = self::target(target).to_string();
        self.calls.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    /// Highest number of audits observed running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn policies(&self) -> Vec<AttemptPolicy> {
        self.policies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Auditor for ScriptedAuditor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_audit(
        &self,
        target: &Target,
        _options: &JobOptions,
        policy: &AttemptPolicy,
    ) -> Result<AuditOutput, JobError> {
        let key = target.to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        self.policies.lock().unwrap().push(policy.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(&key).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some((times, error)) = self.failures.get(&key) {
            if call <= *times {
                return Err(error.clone());
            }
        }

        let scores = self
            .scores
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default_scores.clone());
        Ok(AuditOutput {
            scores,
            report_artifact: Some(format!("{}.json", target.slug())),
            metrics: BTreeMap::new(),
        })
    }
}

/// Screenshotter that records captures without touching a browser
#[derive(Default)]
pub struct RecordingScreenshotter {
    fail_first: u32,
    captures: AtomicUsize,
}

impl RecordingScreenshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(times: u32) -> Self {
        Self {
            fail_first: times,
            captures: AtomicUsize::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenshotCapturer for RecordingScreenshotter {
    fn name(&self) -> &str {
        "recording"
    }

    async fn capture(
        &self,
        _target: &Target,
        output: &Path,
        _options: &ScreenshotOptions,
        _policy: &AttemptPolicy,
    ) -> Result<PathBuf, JobError> {
        let call = self.captures.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        if call <= self.fail_first {
            return Err(JobError::ResourceExhaustion("browser crashed".to_string()));
        }
        Ok(output.to_path_buf())
    }
}

/// Blob store whose every operation fails
pub struct FailingStore;

impl FailingStore {
    fn error(operation: &'static str) -> StoreError {
        StoreError::Io {
            path: PathBuf::from("/unavailable"),
            operation,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disk offline"),
        }
    }
}

#[async_trait]
impl BlobStore for FailingStore {
    async fn read(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(Self::error("read blob"))
    }

    async fn write(&self, _key: &str, _blob: &[u8]) -> Result<(), StoreError> {
        Err(Self::error("write blob"))
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Err(Self::error("list store directory"))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(Self::error("delete blob"))
    }
}

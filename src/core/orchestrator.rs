//! Batch orchestrator.
//!
//! Fans a list of targets out as independent tasks. Each task consults the
//! result cache, and on a miss waits for a limiter slot and runs the retry
//! executor. Outcomes are collected for every target, in input order,
//! whatever order the tasks finish in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use crate::domain::{
    BatchOutcome, JobError, JobKey, JobOptions, JobResult, KeyDescriptor, OutcomeSource, Target,
    TargetOutcome,
};
use crate::report::{summarize, Summary};

use super::cache::{ResultCache, DEFAULT_CACHE_DURATION};
use super::limiter::{Limiter, LimiterError, DEFAULT_MAX_CONCURRENT};
use super::retry::RetryExecutor;
use super::store::BlobStore;

/// Batch-wide bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Jobs allowed to hold an external resource at once
    pub max_concurrent: usize,

    /// Retries per job after the first attempt
    pub max_retries: u32,

    /// How long a stored result stays reusable
    pub cache_duration: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: 2,
            cache_duration: DEFAULT_CACHE_DURATION,
        }
    }
}

/// Everything a batch produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub summary: Summary,
}

/// What the job that led an execution settled on
#[derive(Debug, Clone)]
struct Settled {
    result: JobResult,
    attempts: u32,
    source: OutcomeSource,
}

/// Executions currently running, by the full inputs of their job key.
///
/// The first job for a key initializes the cell; concurrent jobs with the
/// same key await it instead of running a second execution. Matching on the
/// descriptor rather than the digest means a digest collision can never hand
/// one job another job's result.
#[derive(Debug, Default)]
struct InFlight {
    jobs: Mutex<HashMap<KeyDescriptor, Arc<OnceCell<Settled>>>>,
}

impl InFlight {
    fn join(&self, key: &JobKey) -> Arc<OnceCell<Settled>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.entry(key.descriptor().clone()).or_default().clone()
    }

    fn finish(&self, key: &JobKey, cell: &Arc<OnceCell<Settled>>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let same = jobs
            .get(key.descriptor())
            .is_some_and(|current| Arc::ptr_eq(current, cell));
        if same {
            jobs.remove(key.descriptor());
        }
    }

    fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// State shared by every job task of an orchestrator
struct JobContext {
    limiter: Limiter,
    cache: Arc<ResultCache>,
    executor: Arc<RetryExecutor>,
    in_flight: InFlight,
}

impl JobContext {
    /// Run one job to a `TargetOutcome`
    async fn run_job(&self, target: Target, key: JobKey, options: Arc<JobOptions>) -> TargetOutcome {
        let started = Instant::now();
        let cell = self.in_flight.join(&key);

        let mut led = false;
        let settled = cell
            .get_or_init(|| {
                led = true;
                self.execute(&target, &key, &options)
            })
            .await
            .clone();

        let (attempts, source) = if led {
            self.in_flight.finish(&key, &cell);
            (settled.attempts, settled.source)
        } else {
            debug!(target = %target, key = key.short(), "Joined in-flight execution");
            // A leader served from cache still counts as a cache hit
            let source = match settled.source {
                OutcomeSource::Cache => OutcomeSource::Cache,
                _ => OutcomeSource::Shared,
            };
            (0, source)
        };

        TargetOutcome {
            target,
            key,
            result: settled.result,
            attempts,
            source,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// cache lookup -> acquire -> execute -> store on success -> release
    async fn execute(&self, target: &Target, key: &JobKey, options: &JobOptions) -> Settled {
        if let Some(result) = self.cache.lookup(key).await {
            info!(target = %target, key = key.short(), "Using cached result");
            return Settled {
                result,
                attempts: 0,
                source: OutcomeSource::Cache,
            };
        }

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(target = %target, error = %e, "Could not acquire a job slot");
                return Settled {
                    result: JobResult::failure(&JobError::Internal(e.to_string())),
                    attempts: 0,
                    source: OutcomeSource::Fresh,
                };
            }
        };
        debug!(target = %target, in_use = self.limiter.in_use(), "Acquired job slot");

        let run = self.executor.run(target, options).await;

        if run.result.is_success() {
            self.cache.store(key, &run.result).await;
        }

        permit.release();

        Settled {
            result: run.result,
            attempts: run.attempts,
            source: OutcomeSource::Fresh,
        }
    }
}

/// Runs batches of audit jobs
pub struct BatchOrchestrator {
    limits: BatchLimits,
    context: Arc<JobContext>,
}

impl BatchOrchestrator {
    /// Create an orchestrator whose cache persists to `store`
    pub fn new(
        limits: BatchLimits,
        store: Arc<dyn BlobStore>,
        executor: RetryExecutor,
    ) -> Result<Self, LimiterError> {
        let limiter = Limiter::new(limits.max_concurrent)?;
        let cache = Arc::new(ResultCache::new(store, limits.cache_duration));

        Ok(Self {
            limits,
            context: Arc::new(JobContext {
                limiter,
                cache,
                executor: Arc::new(executor),
                in_flight: InFlight::default(),
            }),
        })
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    pub fn limiter(&self) -> &Limiter {
        &self.context.limiter
    }

    pub fn cache(&self) -> &ResultCache {
        &self.context.cache
    }

    /// Executions currently in flight
    pub fn in_flight(&self) -> usize {
        self.context.in_flight.len()
    }

    /// Run every target and summarize.
    ///
    /// Never fails: a target that cannot be audited is recorded as a
    /// `Failure` outcome and its siblings keep running.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run_batch(&self, targets: Vec<Target>, options: JobOptions) -> BatchReport {
        let started_at = Utc::now();
        let started = Instant::now();

        let mut options = options;
        options.retry.max_retries = self.limits.max_retries;
        let options = Arc::new(options);

        info!(
            max_concurrent = self.limits.max_concurrent,
            max_retries = self.limits.max_retries,
            "Starting batch"
        );

        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let key = JobKey::derive(&target, &options);
                let context = self.context.clone();
                let options = options.clone();
                let handle = tokio::spawn({
                    let target = target.clone();
                    let key = key.clone();
                    async move { context.run_job(target, key, options).await }
                });
                (target, key, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (target, key, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(target = %target, error = %e, "Job task aborted");
                    TargetOutcome {
                        target,
                        key,
                        result: JobResult::failure(&JobError::Internal(format!(
                            "job task aborted: {}",
                            e
                        ))),
                        attempts: 0,
                        source: OutcomeSource::Fresh,
                        duration_ms: 0,
                    }
                }
            };
            outcomes.push(outcome);
        }

        let outcome = BatchOutcome {
            outcomes,
            categories: options.categories.clone(),
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let summary = summarize(&outcome);

        info!(
            total = summary.total_tests,
            passed = summary.passed_tests,
            failed = summary.failed_tests,
            cached = summary.cached_tests,
            elapsed_ms = summary.elapsed_ms,
            "Batch complete"
        );

        BatchReport { outcome, summary }
    }
}

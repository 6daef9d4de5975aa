//! Job results and batch outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, JobError};
use super::job::{JobKey, Target};

/// Outcome of one job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Success {
        /// category -> score (0-100)
        scores: BTreeMap<String, f64>,

        /// Paths of report/screenshot artifacts
        artifact_refs: Vec<String>,

        timestamp: DateTime<Utc>,
    },

    Failure {
        error_kind: ErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobResult {
    pub fn success(scores: BTreeMap<String, f64>, artifact_refs: Vec<String>) -> Self {
        Self::Success {
            scores,
            artifact_refs,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error: &JobError) -> Self {
        Self::Failure {
            error_kind: error.kind(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Scores of a successful result
    pub fn scores(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Success { scores, .. } => Some(scores),
            Self::Failure { .. } => None,
        }
    }

    pub fn artifact_refs(&self) -> &[String] {
        match self {
            Self::Success { artifact_refs, .. } => artifact_refs,
            Self::Failure { .. } => &[],
        }
    }

    /// Kind and message of a failed result
    pub fn error(&self) -> Option<(ErrorKind, &str)> {
        match self {
            Self::Success { .. } => None,
            Self::Failure {
                error_kind,
                message,
                ..
            } => Some((*error_kind, message.as_str())),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Success { timestamp, .. } | Self::Failure { timestamp, .. } => *timestamp,
        }
    }
}

/// Where a target's result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Executed against the collaborators in this batch
    Fresh,

    /// Served from the result cache
    Cache,

    /// Joined another in-flight execution of the same key
    Shared,
}

/// A job result tagged with its originating target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub target: Target,
    pub key: JobKey,
    pub result: JobResult,

    /// Attempts made by this job (0 for cached and shared results)
    pub attempts: u32,

    pub source: OutcomeSource,

    /// Wall time from dispatch to result
    pub duration_ms: u64,
}

/// Per-target outcomes of one batch, in input order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<TargetOutcome>,

    /// Categories requested for the batch
    pub categories: Vec<String>,

    pub started_at: DateTime<Utc>,

    pub elapsed_ms: u64,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.outcomes.iter().map(|o| &o.target)
    }
}

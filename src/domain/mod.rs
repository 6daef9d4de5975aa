//! Domain types for the audit batch runner.
//!
//! This module contains the core data structures:
//! - Job: targets, options and the derived cache key
//! - Result: job results and batch outcomes
//! - Errors: the job error taxonomy

pub mod errors;
pub mod job;
pub mod result;

// Re-export commonly used types
pub use errors::{classify_navigation_error, ErrorKind, JobError};
pub use job::{
    parse_target_list, JobKey, JobOptions, KeyDescriptor, OptionsFingerprint, OutputFormat,
    ScreenshotOptions, Target, WaitCondition, DEFAULT_FLAKY_AUDITS, KNOWN_CATEGORIES,
};
pub use result::{BatchOutcome, JobResult, OutcomeSource, TargetOutcome};

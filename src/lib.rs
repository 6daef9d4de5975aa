//! auditbatch - Concurrency-limited batch runner for website audits
//!
//! Runs one audit job per target against a bounded pool of headless
//! browser/auditor instances, reusing recent results from a durable cache
//! and retrying transient failures.
//!
//! # Architecture
//!
//! - A FIFO limiter bounds how many jobs hold an external resource at once
//! - Results are cached by a SHA-256 key over (target, options) and expire
//!   after a configurable window
//! - Each job runs under a bounded-retry executor that relaxes its own
//!   wait conditions after navigation timeouts
//! - A batch always completes: per-target failures are recorded, never
//!   propagated
//!
//! # Modules
//!
//! - `adapters`: Audit and screenshot engines (Lighthouse, headless Chrome)
//! - `core`: Orchestration logic (Limiter, ResultCache, RetryExecutor, BatchOrchestrator)
//! - `domain`: Data structures (Target, JobOptions, JobKey, JobResult)
//! - `report`: Summaries and their renderings
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Audit two sites, one at a time
//! auditbatch run a.example b.example --concurrency 1
//!
//! # Audit a list of sites and emit JSON
//! auditbatch run --file sites.txt --format json
//!
//! # Drop expired cache entries
//! auditbatch cache sweep
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod report;

// Re-export main types at crate root for convenience
pub use adapters::{AuditOutput, Auditor, ScreenshotCapturer};
pub use core::{BatchLimits, BatchOrchestrator, BatchReport, RetryExecutor};
pub use domain::{JobError, JobKey, JobOptions, JobResult, Target};
pub use report::{summarize, Summary};

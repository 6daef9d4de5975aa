//! Core orchestration logic.
//!
//! This module contains:
//! - Limiter: FIFO concurrency limiter with RAII slots
//! - Store: Durable key -> blob stores
//! - Cache: Expiring result cache over a blob store
//! - Retry: Bounded-retry job executor
//! - Orchestrator: Batch fan-out and collection

pub mod cache;
pub mod limiter;
pub mod orchestrator;
pub mod retry;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheRecord, CacheStats, ResultCache, SweepStats, DEFAULT_CACHE_DURATION};
pub use limiter::{Limiter, LimiterError, LimiterPermit, DEFAULT_MAX_CONCURRENT};
pub use orchestrator::{BatchLimits, BatchOrchestrator, BatchReport};
pub use retry::{AttemptPolicy, Backoff, ExecutorRun, JobState, RetryExecutor, RetryPolicy};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, StoreError};

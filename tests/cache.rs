//! Result Cache Integration Tests
//!
//! Freshness window, durability across reopen, key stability and
//! degradation to a miss when storage fails.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use auditbatch::core::{BlobStore, FsBlobStore, MemoryBlobStore, ResultCache, RetryPolicy};
use auditbatch::domain::{JobKey, JobOptions, JobResult};
use tempfile::TempDir;

use common::{target, FailingStore};

fn result(score: f64) -> JobResult {
    JobResult::success(
        BTreeMap::from([("performance".to_string(), score)]),
        vec!["reports/a.example.json".to_string()],
    )
}

fn key(input: &str) -> JobKey {
    JobKey::derive(&target(input), &JobOptions::default())
}

#[tokio::test]
async fn test_lookup_within_window_returns_stored_result() {
    let cache = ResultCache::new(Arc::new(MemoryBlobStore::new()), Duration::from_secs(60));

    for (i, host) in ["a.example", "b.example", "c.example"].iter().enumerate() {
        let stored = result(50.0 + i as f64);
        assert!(cache.store(&key(host), &stored).await);
        assert_eq!(cache.lookup(&key(host)).await, Some(stored));
    }
}

#[tokio::test]
async fn test_lookup_after_window_is_absent_and_evicted() {
    let store = Arc::new(MemoryBlobStore::new());
    let cache = ResultCache::new(store.clone(), Duration::from_millis(40));

    cache.store(&key("a.example"), &result(70.0)).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(cache.lookup(&key("a.example")).await, None);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_overwrites_previous_entry() {
    let cache = ResultCache::new(Arc::new(MemoryBlobStore::new()), Duration::from_secs(60));

    cache.store(&key("a.example"), &result(10.0)).await;
    cache.store(&key("a.example"), &result(20.0)).await;

    let found = cache.lookup(&key("a.example")).await.unwrap();
    assert_eq!(found.scores().unwrap()["performance"], 20.0);
}

#[tokio::test]
async fn test_entries_survive_process_restart() {
    let temp = TempDir::new().unwrap();
    let stored = result(88.0);

    {
        let cache = ResultCache::new(
            Arc::new(FsBlobStore::new(temp.path())),
            Duration::from_secs(60),
        );
        cache.store(&key("a.example"), &stored).await;
    }

    let reopened = ResultCache::new(
        Arc::new(FsBlobStore::new(temp.path())),
        Duration::from_secs(60),
    );
    assert_eq!(reopened.lookup(&key("a.example")).await, Some(stored));
}

#[tokio::test]
async fn test_storage_failure_degrades_to_miss() {
    let cache = ResultCache::new(Arc::new(FailingStore), Duration::from_secs(60));

    assert!(!cache.store(&key("a.example"), &result(1.0)).await);
    assert_eq!(cache.lookup(&key("a.example")).await, None);

    let sweep = cache.sweep().await;
    assert_eq!(sweep.errors, 1);
    assert_eq!(cache.clear().await, 0);
}

#[tokio::test]
async fn test_torn_write_is_invisible() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(temp.path()));
    let cache = ResultCache::new(store.clone(), Duration::from_secs(60));

    cache.store(&key("a.example"), &result(60.0)).await;

    // A crash between temp-file write and rename leaves only a dotfile behind
    std::fs::write(temp.path().join(".0000-crashed.tmp"), b"{\"key\":").unwrap();

    assert_eq!(store.list().await.unwrap().len(), 1);
    assert!(cache.lookup(&key("a.example")).await.is_some());
    assert_eq!(cache.sweep().await.evicted, 0);
}

#[tokio::test]
async fn test_sweep_runs_alongside_lookup_and_store() {
    let cache = Arc::new(ResultCache::new(
        Arc::new(MemoryBlobStore::new()),
        Duration::from_millis(200),
    ));

    for i in 0..10 {
        cache.store(&key(&format!("old{}.example", i)), &result(1.0)).await;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                let k = key(&format!("new{}.example", i));
                cache.store(&k, &result(2.0)).await;
                assert!(cache.lookup(&k).await.is_some());
            }
        })
    };
    let sweeper = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.sweep().await })
    };

    writer.await.unwrap();
    let stats = sweeper.await.unwrap();
    assert!(stats.evicted >= 10);

    let remaining = cache.stats().await;
    assert_eq!(remaining.entries, 10);
}

#[test]
fn test_key_is_stable_and_ignores_retry_settings() {
    let options = JobOptions::default();
    let first = JobKey::derive(&target("a.example"), &options);
    let second = JobKey::derive(&target("https://a.example"), &options.clone());
    assert_eq!(first, second);
    assert_eq!(first.as_str().len(), 64);

    let patient = JobOptions {
        retry: RetryPolicy {
            max_retries: 9,
            attempt_timeout_ms: 1,
            ..Default::default()
        },
        ..JobOptions::default()
    };
    assert_eq!(JobKey::derive(&target("a.example"), &patient), first);

    let seo_only = JobOptions {
        categories: vec!["seo".to_string()],
        ..JobOptions::default()
    };
    assert_ne!(JobKey::derive(&target("a.example"), &seo_only), first);
    assert_ne!(JobKey::derive(&target("b.example"), &options), first);
}

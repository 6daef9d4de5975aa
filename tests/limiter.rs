//! Limiter Integration Tests
//!
//! Capacity bound, FIFO hand-off and release on every exit path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use auditbatch::core::{Limiter, LimiterError};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_never_exceeds_capacity() {
    for capacity in [1usize, 2, 3] {
        for jobs in [0usize, 1, 5, 20] {
            let limiter = Limiter::new(capacity).unwrap();

            let handles: Vec<_> = (0..jobs)
                .map(|_| {
                    let limiter = limiter.clone();
                    tokio::spawn(async move {
                        let permit = limiter.acquire().await.unwrap();
                        assert!(limiter.in_use() <= limiter.capacity());
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        permit.release();
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap();
            }

            assert!(limiter.peak() <= capacity, "peak {} > {}", limiter.peak(), capacity);
            assert_eq!(limiter.in_use(), 0);
        }
    }
}

#[tokio::test]
async fn test_waiters_served_in_arrival_order() {
    let limiter = Limiter::new(1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = limiter.acquire().await.unwrap();

    let mut handles = Vec::new();
    for id in 0..5 {
        let limiter = limiter.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire().await.unwrap();
            order.lock().unwrap().push(id);
        }));
        // Let each waiter enqueue before the next one arrives
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(held);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_slot_released_on_error_path() {
    async fn failing_job(limiter: &Limiter) -> Result<(), String> {
        let _permit = limiter.acquire().await.map_err(|e| e.to_string())?;
        Err("audit exploded".to_string())
    }

    let limiter = Limiter::new(1).unwrap();
    assert!(failing_job(&limiter).await.is_err());
    assert_eq!(limiter.in_use(), 0);

    // The slot is usable again straight away
    let permit = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
    assert_ok!(assert_ok!(permit));
}

#[tokio::test]
async fn test_slot_released_when_task_aborted() {
    let limiter = Limiter::new(1).unwrap();

    let task = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let _permit = limiter.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(limiter.in_use(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(limiter.in_use(), 0);

    let permit = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
    assert!(permit.is_ok());
}

#[tokio::test]
async fn test_close_wakes_waiters_with_error() {
    let limiter = Limiter::new(1).unwrap();
    let _held = limiter.acquire().await.unwrap();

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    limiter.close();
    assert_eq!(waiter.await.unwrap(), Err(LimiterError::Closed));
}

//! Admission Control Integration Tests
//!
//! Tests for the concurrency limit, the bounded queue and FIFO order.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_test::assert_ok;
use trailer_resolver::core::{AdmissionConfig, AdmissionController};
use trailer_resolver::domain::Overloaded;

fn controller(max_concurrent: usize, max_queue: usize, wait_ms: u64) -> Arc<AdmissionController> {
    Arc::new(AdmissionController::new(
        &AdmissionConfig {
            max_concurrent,
            max_queue,
        },
        Duration::from_millis(wait_ms),
    ))
}

#[tokio::test]
async fn test_rejects_immediately_beyond_limit_plus_queue() {
    let admission = controller(2, 2, 2_000);
    let first = admission.admit().await.unwrap();
    let _second = admission.admit().await.unwrap();

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.admit().await.map(|slot| slot.waited()) })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(admission.queued(), 2);

    let start = Instant::now();
    let rejected = admission.admit().await;
    assert_eq!(rejected.unwrap_err(), Overloaded::QueueFull { limit: 4 });
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(admission.in_flight(), 2);

    // Releasing a slot admits a queued request
    admission.release(first);
    drop(_second);
    for waiter in waiters {
        let waited = assert_ok!(waiter.await.unwrap());
        assert!(waited >= Duration::from_millis(10));
    }

    let stats = admission.stats();
    assert_eq!(stats.admitted_total, 4);
    assert_eq!(stats.rejected_queue_full, 1);
    assert_eq!(stats.queued, 0);
}

#[tokio::test]
async fn test_queue_is_fifo() {
    let admission = controller(1, 3, 2_000);
    let held = admission.admit().await.unwrap();
    let admitted = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for n in 0..3 {
        let admission = Arc::clone(&admission);
        let admitted = Arc::clone(&admitted);
        waiters.push(tokio::spawn(async move {
            let slot = admission.admit().await.unwrap();
            admitted.lock().unwrap().push(n);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(slot);
        }));
        // Let each waiter enqueue before the next one
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*admitted.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_never_exceeds_concurrency_limit() {
    let admission = controller(3, 50, 5_000);
    let running = Arc::new(Mutex::new((0usize, 0usize)));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let admission = Arc::clone(&admission);
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                let slot = admission.admit().await.unwrap();
                {
                    let mut guard = running.lock().unwrap();
                    guard.0 += 1;
                    guard.1 = guard.1.max(guard.0);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.lock().unwrap().0 -= 1;
                admission.release(slot);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    let (now, peak) = *running.lock().unwrap();
    assert_eq!(now, 0);
    assert!(peak <= 3, "peak concurrency {}", peak);
    assert_eq!(admission.stats().admitted_total, 20);
}

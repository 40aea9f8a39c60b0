//! Admission control for incoming resolution requests.
//!
//! At most `max_concurrent` requests run at once; up to `max_queue` more wait
//! in FIFO order. Anything beyond that is refused immediately, and a queued
//! request that waits longer than `max_queue_wait` is refused rather than
//! served after its caller has given up.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::domain::Overloaded;

/// Admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Concurrent requests (default: 32)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Requests allowed to wait for a slot (default: 64)
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

fn default_max_concurrent() -> usize {
    32
}
fn default_max_queue() -> usize {
    64
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue: default_max_queue(),
        }
    }
}

/// A granted concurrency slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    admitted_at: Instant,
    waited: Duration,
}

impl Slot {
    /// Time spent queued before admission
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn held_for(&self) -> Duration {
        self.admitted_at.elapsed()
    }
}

/// Counters exposed through the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub admitted_total: u64,
    pub rejected_queue_full: u64,
    pub rejected_queue_timeout: u64,
}

/// Releases a queue reservation on every exit path, including cancellation
struct QueueReservation<'a>(&'a AtomicUsize);

impl Drop for QueueReservation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded concurrency with a bounded FIFO queue
#[derive(Debug)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_queue: usize,
    max_queue_wait: Duration,
    queued: AtomicUsize,
    admitted_total: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_queue_timeout: AtomicU64,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig, max_queue_wait: Duration) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queue: config.max_queue,
            max_queue_wait,
            queued: AtomicUsize::new(0),
            admitted_total: AtomicU64::new(0),
            rejected_queue_full: AtomicU64::new(0),
            rejected_queue_timeout: AtomicU64::new(0),
        }
    }

    /// Take a slot, queueing for at most `max_queue_wait`
    pub async fn admit(&self) -> Result<Slot, Overloaded> {
        let start = Instant::now();

        // The semaphore hands released permits to waiters first, so a free
        // permit here never jumps ahead of queued requests.
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(self.grant(permit, start));
        }

        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                (q < self.max_queue).then_some(q + 1)
            })
            .is_ok();
        if !reserved {
            self.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
            warn!(
                max_concurrent = self.max_concurrent,
                max_queue = self.max_queue,
                "Admission rejected: queue full"
            );
            return Err(Overloaded::QueueFull {
                limit: self.max_concurrent + self.max_queue,
            });
        }
        let _reservation = QueueReservation(&self.queued);

        match tokio::time::timeout(self.max_queue_wait, Arc::clone(&self.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(self.grant(permit, start)),
            Ok(Err(_closed)) => Err(Overloaded::Closed),
            Err(_) => {
                self.rejected_queue_timeout.fetch_add(1, Ordering::Relaxed);
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(waited_ms, "Admission rejected: queue wait exceeded");
                Err(Overloaded::QueueTimeout { waited_ms })
            }
        }
    }

    /// Give a slot back; the next queued request is admitted at once
    pub fn release(&self, slot: Slot) {
        debug!(held_ms = slot.held_for().as_millis() as u64, "Releasing admission slot");
        drop(slot);
    }

    /// Stop admitting; queued requests fail with `Overloaded::Closed`
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
            in_flight: self.in_flight(),
            queued: self.queued(),
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            rejected_queue_full: self.rejected_queue_full.load(Ordering::Relaxed),
            rejected_queue_timeout: self.rejected_queue_timeout.load(Ordering::Relaxed),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit, start: Instant) -> Slot {
        self.admitted_total.fetch_add(1, Ordering::Relaxed);
        let waited = start.elapsed();
        debug!(
            waited_ms = waited.as_millis() as u64,
            in_flight = self.in_flight(),
            "Admitted request"
        );
        Slot {
            _permit: permit,
            admitted_at: Instant::now(),
            waited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_concurrent: usize, max_queue: usize, wait_ms: u64) -> AdmissionController {
        AdmissionController::new(
            &AdmissionConfig {
                max_concurrent,
                max_queue,
            },
            Duration::from_millis(wait_ms),
        )
    }

    #[tokio::test]
    async fn test_admits_up_to_limit() {
        let admission = controller(2, 0, 10);
        let a = admission.admit().await.unwrap();
        let _b = admission.admit().await.unwrap();
        assert_eq!(admission.in_flight(), 2);

        let rejected = admission.admit().await;
        assert!(matches!(rejected, Err(Overloaded::QueueFull { limit: 2 })));

        admission.release(a);
        assert_eq!(admission.in_flight(), 1);
        assert!(admission.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_wait_times_out() {
        let admission = controller(1, 1, 30);
        let _held = admission.admit().await.unwrap();

        let start = Instant::now();
        let result = admission.admit().await;
        assert!(matches!(result, Err(Overloaded::QueueTimeout { .. })));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(admission.queued(), 0);
        assert_eq!(admission.stats().rejected_queue_timeout, 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let admission = Arc::new(controller(1, 1, 1_000));
        let held = admission.admit().await.unwrap();

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.admit().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        admission.close();

        assert_eq!(waiter.await.unwrap(), Err(Overloaded::Closed));
        drop(held);
    }
}

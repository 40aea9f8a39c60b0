//! Resolution Cache Integration Tests
//!
//! Tests for in-flight de-duplication, TTL expiry and cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use trailer_resolver::core::{CacheValue, ResolutionCache};
use trailer_resolver::domain::{ResolveError, ResolvedStream};

fn cache(positive_ms: u64, negative_ms: u64) -> ResolutionCache {
    ResolutionCache::with_ttls(
        Duration::from_millis(positive_ms),
        Duration::from_millis(negative_ms),
        None,
    )
}

fn found(url: &str) -> CacheValue {
    CacheValue::Found(ResolvedStream::new(url, "a", "videos", "abc"))
}

#[tokio::test]
async fn test_concurrent_callers_share_one_computation() {
    let cache = cache(60_000, 10_000);
    let runs = Arc::new(AtomicUsize::new(0));

    let callers = (0..20).map(|_| {
        let cache = cache.clone();
        let runs = Arc::clone(&runs);
        async move {
            cache
                .get_or_compute("movie:tt0113277", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, ResolveError>(found("https://cdn/heat.mp4"))
                })
                .await
        }
    });
    let results = join_all(callers).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let first = results[0].clone().unwrap();
    for result in results {
        assert_eq!(result.unwrap(), first);
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.joins, 19);
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_hit_after_completion() {
    let cache = cache(60_000, 10_000);
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let runs = Arc::clone(&runs);
        let value = cache
            .get_or_compute("k", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResolveError>(found("https://cdn/t.mp4"))
            })
            .await;
        assert_ok!(value);
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);

    match cache.get("k").unwrap().value {
        CacheValue::Found(stream) => assert!(stream.expires_at.is_some()),
        CacheValue::NotFound => panic!("expected a stream"),
    }
}

#[tokio::test]
async fn test_negative_entries_expire_first() {
    let cache = cache(2_000, 50);
    let runs = Arc::new(AtomicUsize::new(0));

    let compute_missing = |runs: Arc<AtomicUsize>| {
        move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ResolveError>(CacheValue::NotFound)
        }
    };

    assert_eq!(
        cache
            .get_or_compute("missing", compute_missing(Arc::clone(&runs)))
            .await
            .unwrap(),
        CacheValue::NotFound
    );
    cache
        .get_or_compute("present", || async { Ok::<_, ResolveError>(found("https://cdn/p.mp4")) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(cache.get("missing").is_none());
    assert!(cache.get("present").is_some());

    // The pipeline runs again once the negative entry is gone
    cache
        .get_or_compute("missing", compute_missing(Arc::clone(&runs)))
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_expired_entry_is_never_served() {
    let cache = cache(40, 20);
    cache.insert("k", found("https://cdn/old.mp4"));
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(cache.get("k").is_none());
    let value = cache
        .get_or_compute("k", || async { Ok::<_, ResolveError>(found("https://cdn/new.mp4")) })
        .await
        .unwrap();
    match value {
        CacheValue::Found(stream) => assert_eq!(stream.url, "https://cdn/new.mp4"),
        CacheValue::NotFound => panic!("expected a stream"),
    }
}

#[tokio::test]
async fn test_errors_reach_joiners_but_are_not_cached() {
    let cache = cache(60_000, 10_000);
    let runs = Arc::new(AtomicUsize::new(0));

    let attempt = |runs: Arc<AtomicUsize>| {
        move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<CacheValue, _>(ResolveError::ExtractionExhausted { attempts: 2 })
        }
    };

    let (first, second) = tokio::join!(
        cache.get_or_compute("k", attempt(Arc::clone(&runs))),
        cache.get_or_compute("k", attempt(Arc::clone(&runs))),
    );
    assert_eq!(first, Err(ResolveError::ExtractionExhausted { attempts: 2 }));
    assert_eq!(second, first);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(cache.get("k").is_none());
    let retry = cache.get_or_compute("k", attempt(Arc::clone(&runs))).await;
    assert_err!(retry);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Flags when the computation future is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_abandoned_computation_is_cancelled_and_restarted() {
    let cache = cache(60_000, 10_000);
    let dropped = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&dropped);
    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        cache.get_or_compute("k", move || async move {
            let _guard = DropFlag(flag);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ResolveError>(CacheValue::NotFound)
        }),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(dropped.load(Ordering::SeqCst));

    let value = cache
        .get_or_compute("k", || async { Ok::<_, ResolveError>(found("https://cdn/t.mp4")) })
        .await;
    assert!(matches!(value, Ok(CacheValue::Found(_))));
    assert_eq!(cache.stats().computations, 2);
}

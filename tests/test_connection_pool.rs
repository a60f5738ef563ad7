// ABOUTME: Integration tests for ConnectionPool capacity, reuse, health isolation and disposal

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helpers::TestBackend;
use pretty_assertions::assert_eq;
use provider_pool::pool::{ConnectionPool, PoolConfig, PoolError};

fn pool(backend: &Arc<TestBackend>, size: usize) -> Arc<ConnectionPool<u32>> {
    Arc::new(ConnectionPool::new("backend", backend.clone(), PoolConfig::with_size(size)).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_never_exceeded_under_contention() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 3);
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..24)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let handle = pool.acquire().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let status = pool.status();
                assert!(status.total + status.pending <= 3);
                assert!(status.active <= status.total);

                tokio::time::sleep(Duration::from_millis(2)).await;
                in_use.fetch_sub(1, Ordering::SeqCst);
                assert!(pool.release(&handle));
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(backend.connect_count() <= 3);
    assert_eq!(pool.status().active, 0);
    assert_eq!(pool.metrics().acquired.load(Ordering::Relaxed), 24);
}

#[tokio::test]
async fn test_sequential_reuse_creates_one_connection() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 4);

    for _ in 0..10 {
        let handle = pool.acquire().await.unwrap();
        assert_eq!(*handle, 1);
        pool.release(&handle);
    }

    assert_eq!(backend.connect_count(), 1);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_saturated_pool_resumes_with_released_connection() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 2);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_ne!(first.id(), second.id());

    let third = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!third.is_finished());

    pool.release(&second);
    let third = third.await.unwrap().unwrap();

    assert_eq!(third.id(), second.id());
    assert_eq!(backend.connect_count(), 2);
}

#[tokio::test]
async fn test_refusing_factory_leaves_pool_empty() {
    let backend = Arc::new(TestBackend::refusing());
    let pool = pool(&backend, 2);

    for _ in 0..3 {
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionCreation { .. }));
        assert!(err.is_unavailable());
    }

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.pending, 0);
    assert_eq!(backend.connect_count(), 3);
}

#[tokio::test]
async fn test_health_check_probes_active_and_idle() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 3);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let _c = pool.acquire().await.unwrap();
    pool.release(&a);
    backend.mark_unhealthy(*b);

    let result = pool.check_health().await;

    assert_eq!(backend.health_check_count(), 3);
    assert!(result.is_healthy);
    assert_eq!(result.healthy_connections(), 2);
    let details = result.details.unwrap();
    assert!(!details.results[1].is_healthy);
    assert!(details.results[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unresponsive")));

    // Still usable after a failed probe
    pool.release(&b);
    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id(), a.id());
}

#[tokio::test]
async fn test_dispose_leaves_no_live_connections() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 3);

    let a = pool.acquire().await.unwrap();
    let _b = pool.acquire().await.unwrap();
    pool.release(&a);
    backend.fail_disconnect_of(2);

    let failures = pool.dispose().await;

    assert_eq!(failures.len(), 1);
    assert_eq!(backend.disconnect_count(), 2);
    assert_eq!(backend.live_connections(), 0);
    assert_eq!(pool.status().total, 0);

    assert!(pool.dispose().await.is_empty());
    assert_eq!(backend.disconnect_count(), 2);
}

#[tokio::test]
async fn test_timeout_then_successful_acquire() {
    let backend = Arc::new(TestBackend::new());
    let pool = pool(&backend, 1);
    let held = pool.acquire().await.unwrap();

    let err = pool
        .acquire_timeout(Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::AcquireTimeout { waited, .. } if waited >= Duration::from_millis(20)));

    pool.release(&held);
    let next = pool
        .acquire_timeout(Some(Duration::from_millis(20)))
        .await
        .unwrap();
    assert_eq!(next.id(), held.id());
}

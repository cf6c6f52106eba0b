use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::*;

#[test]
fn test_semaphore_permits() {
    let semaphore = Arc::new(Semaphore::new(2));
    let first = semaphore.acquire();
    let second = semaphore.acquire();
    assert_eq!(semaphore.available(), 0);
    drop(first);
    assert_eq!(semaphore.available(), 1);
    drop(second);
    assert_eq!(semaphore.available(), 2);
}

#[test]
fn test_capacity_never_exceeded() {
    let running = AtomicUsize::new(0);
    let most = AtomicUsize::new(0);
    let finished = AtomicUsize::new(0);

    let result = thread::scope(|s| {
        let mut pool = WorkerPool::new(s, 3);
        for _ in 0..20 {
            pool.submit(|| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                most.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        pool.wait_all()
    });

    assert!(result.is_ok());
    assert_eq!(finished.load(Ordering::SeqCst), 20);
    assert!(most.load(Ordering::SeqCst) <= 3);
    assert!(most.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_wait_all_reports_failure() {
    let finished = AtomicUsize::new(0);
    let result = thread::scope(|s| {
        let mut pool = WorkerPool::new(s, 2);
        pool.submit(|| {
            thread::sleep(Duration::from_millis(10));
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        pool.submit(|| {
            Err(MeasureError::UnknownPatch {
                instrument: 4,
                index: 9,
            })
        })
        .unwrap();
        pool.wait_all()
    });

    assert!(matches!(result, Err(MeasureError::UnknownPatch { instrument: 4, .. })));
    // the healthy task still ran to completion
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panic_releases_slot() {
    let result = thread::scope(|s| {
        let mut pool = WorkerPool::new(s, 1);
        pool.submit(|| panic!("boom")).unwrap();
        pool.wait_all()
    });
    assert!(matches!(result, Err(MeasureError::WorkerPanicked)));
}

#[test]
fn test_submit_after_failure() {
    thread::scope(|s| {
        let mut pool = WorkerPool::new(s, 1);
        pool.submit(|| Err(MeasureError::WorkerPanicked)).unwrap();
        while pool.handles.iter().any(|h| !h.is_finished()) {
            thread::yield_now();
        }
        assert!(pool.submit(|| Ok(())).is_err());
        assert!(pool.wait_all().is_ok());
    });
}

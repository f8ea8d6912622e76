//! End-to-end pool behavior: capacity, reuse, reentrancy and reaping

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use respool::{ManageResource, PoolConfiguration, PoolError, ResourcePool};

/// Stand-in for a network connection that records how often it is opened and closed.
#[derive(Default)]
struct CountingManager {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ManageResource for CountingManager {
    type Resource = usize;
    type Error = io::Error;

    fn create(&self) -> io::Result<usize> {
        Ok(self.opened.fetch_add(1, Ordering::SeqCst))
    }

    fn close(&self, _resource: &usize) -> io::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(max_size: usize) -> PoolConfiguration {
    PoolConfiguration::new()
        .with_max_size(max_size)
        .with_reaping_frequency(Duration::ZERO)
}

fn assert_capacity_invariant(pool: &ResourcePool<CountingManager>) {
    let stats = pool.stats();
    let max_size = pool.config().max_size;
    let created = max_size - stats.available_to_create;
    assert!(created <= max_size);
    assert_eq!(stats.total_available + (created - stats.resources.len()), max_size);
}

#[test]
fn exhausted_pool_fails_fast_with_zero_timeout() {
    let pool = ResourcePool::new(
        CountingManager::default(),
        config(1).with_connection_timeout(Duration::ZERO),
    )
    .unwrap();

    let held = pool.checkout(None).unwrap();
    assert_eq!(*held.borrow_mut(), 0);

    let other = pool.clone();
    let result = thread::spawn(move || {
        let start = Instant::now();
        let result = other.checkout(None).map(|c| c.metadata().id);
        (result, start.elapsed())
    })
    .join()
    .unwrap();
    assert!(matches!(result.0, Err(PoolError::Timeout(d)) if d.is_zero()));
    assert!(result.1 < Duration::from_millis(100));

    let other = pool.clone();
    let leased = thread::spawn(move || other.lease(Some(Duration::ZERO)).map(|l| *l))
        .join()
        .unwrap();
    assert!(leased.unwrap_err().is_timeout());
    assert_eq!(pool.metrics().timeouts, 2);

    drop(held);
    assert_capacity_invariant(&pool);
}

#[test]
fn checkin_then_checkout_reuses_the_same_resource() {
    let pool = ResourcePool::new(CountingManager::default(), config(1)).unwrap();

    let first = pool.checkout(None).unwrap().metadata();
    let second = pool.checkout(None).unwrap().metadata();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert!(second.last_used_at >= first.last_used_at);
    assert_eq!(pool.available_to_create(), 0);
    assert_eq!(pool.metrics().created, 1);
}

#[test]
fn creation_count_never_drops_on_return() {
    let pool = ResourcePool::new(CountingManager::default(), config(5)).unwrap();
    assert_eq!(pool.total_available(), 5);
    assert_eq!(pool.available_to_create(), 5);

    let checkout = pool.checkout(None).unwrap();
    assert_eq!(pool.total_available(), 4);
    assert_eq!(pool.available_to_create(), 4);

    drop(checkout);
    assert_eq!(pool.total_available(), 5);
    assert_eq!(pool.available_to_create(), 4);
    assert_capacity_invariant(&pool);
}

#[test]
fn reaping_with_zero_idle_timeout_closes_idle_resources() {
    let manager = CountingManager::default();
    let closed = Arc::clone(&manager.closed);
    let pool = ResourcePool::new(manager, config(2).with_idle_timeout(Duration::ZERO)).unwrap();

    let reaped = pool.checkout(None).unwrap().metadata().id;
    assert_eq!(pool.stats().resources.len(), 1);

    assert_eq!(pool.reap_now(), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(pool.stats().resources.iter().all(|m| m.id != reaped));

    let fresh = pool.checkout(None).unwrap();
    assert_ne!(fresh.metadata().id, reaped);
    assert_eq!(pool.metrics().evicted, 1);
    drop(fresh);
    assert_capacity_invariant(&pool);
}

#[test]
fn background_reaper_evicts_idle_resources() {
    let manager = CountingManager::default();
    let closed = Arc::clone(&manager.closed);
    let pool = ResourcePool::new(
        manager,
        PoolConfiguration::new()
            .with_max_size(1)
            .with_idle_timeout(Duration::ZERO)
            .with_reaping_frequency(Duration::from_millis(10)),
    )
    .unwrap();
    assert!(pool.reaper().is_some());

    pool.scoped_use(None, |_| ()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while closed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(pool.stats().resources.is_empty());
    assert_eq!(pool.available_to_create(), 1);
}

#[test]
fn checked_out_resources_are_never_reaped() {
    let manager = CountingManager::default();
    let closed = Arc::clone(&manager.closed);
    let pool = ResourcePool::new(manager, config(1).with_idle_timeout(Duration::ZERO)).unwrap();

    let held = pool.checkout(None).unwrap();
    let id = held.metadata().id;
    assert_eq!(pool.reap_now(), 0);
    assert_eq!(pool.close_idle(), 0);
    assert!(!pool.delete(id));
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    *held.borrow_mut() += 100;
    drop(held);
    assert!(pool.delete(id));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.available_to_create(), 1);
    assert_capacity_invariant(&pool);
}

#[test]
fn background_reaper_never_closes_a_checked_out_resource() {
    let manager = CountingManager::default();
    let closed = Arc::clone(&manager.closed);
    let pool = ResourcePool::new(
        manager,
        PoolConfiguration::new()
            .with_max_size(1)
            .with_idle_timeout(Duration::ZERO)
            .with_reaping_frequency(Duration::from_millis(5)),
    )
    .unwrap();

    let mut lease = pool.lease(None).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(closed.load(Ordering::SeqCst), 0);
    *lease += 1;
    assert_eq!(*lease, 1);
    drop(lease);

    let deadline = Instant::now() + Duration::from_secs(5);
    while closed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn nested_checkouts_unwind_to_the_starting_state() {
    let pool = ResourcePool::new(CountingManager::default(), config(3)).unwrap();
    let before = pool.stats();

    let outer = pool.checkout(None).unwrap();
    let id = outer.metadata().id;
    outer.detach();
    assert_eq!(pool.checkout_depth(), 1);
    let inner = pool.checkout(None).unwrap();
    assert_eq!(pool.checkout_depth(), 2);
    assert_eq!(inner.metadata().id, id);
    inner.detach();

    pool.checkin().unwrap();
    assert_eq!(pool.checkout_depth(), 1);
    assert!(pool.stats().resources.is_empty());

    pool.checkin().unwrap();
    assert_eq!(pool.checkout_depth(), 0);

    let after = pool.stats();
    assert_eq!(after.resources.len(), 1);
    assert_eq!(after.resources[0].id, id);
    assert_eq!(after.total_available, before.total_available);
    assert!(matches!(pool.checkin(), Err(PoolError::InvalidCheckin)));
}

#[test]
fn extra_checkout_blocks_until_a_checkin() {
    const N: usize = 3;
    let pool = ResourcePool::new(CountingManager::default(), config(N)).unwrap();
    let all_held = Arc::new(Barrier::new(N + 1));
    let release = Arc::new(Barrier::new(N + 1));

    let holders: Vec<_> = (0..N)
        .map(|_| {
            let pool = pool.clone();
            let all_held = Arc::clone(&all_held);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let checkout = pool.checkout(None).unwrap();
                all_held.wait();
                release.wait();
                thread::sleep(Duration::from_millis(50));
                drop(checkout);
            })
        })
        .collect();

    all_held.wait();
    assert_eq!(pool.total_available(), 0);
    assert!(pool.checkout(Some(Duration::from_millis(20))).unwrap_err().is_timeout());
    assert_eq!(pool.stats().waiters, 0);

    release.wait();
    let start = Instant::now();
    let got = pool.checkout(Some(Duration::from_secs(5))).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(got.metadata().id < N as u64);
    drop(got);

    for holder in holders {
        holder.join().unwrap();
    }
    assert_eq!(pool.metrics().created, N as u64);
    assert_capacity_invariant(&pool);
}

#[test]
fn concurrent_scoped_use_never_exceeds_capacity() {
    let pool = ResourcePool::new(
        CountingManager::default(),
        config(4).with_connection_timeout(Duration::from_secs(10)),
    )
    .unwrap();
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..50 {
                    pool.scoped_use(None, |conn| {
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        // Nested checkouts share the slot instead of waiting for another.
                        assert_eq!(pool.checkout(None).unwrap().metadata().id, *conn as u64);
                        in_use.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(pool.metrics().created <= 4);
    assert_eq!(pool.metrics().in_use, 0);
    assert_capacity_invariant(&pool);
}

#[tokio::test]
async fn scoped_use_async_returns_the_resource() {
    let pool = ResourcePool::new(CountingManager::default(), config(1)).unwrap();

    let seen = pool
        .scoped_use_async(None, async |conn: &mut usize| {
            tokio::task::yield_now().await;
            *conn += 10;
            *conn
        })
        .await
        .unwrap();

    assert_eq!(seen, 10);
    assert_eq!(*pool.lease(None).unwrap(), 10);
    assert_eq!(pool.total_available(), 1);
    assert_eq!(pool.stats().resources.len(), 1);
}

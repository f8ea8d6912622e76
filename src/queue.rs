//! Bounded queue of idle resources with lazy creation and timed blocking poll

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{PoolError, PoolResult};
use crate::manager::ManageResource;
use crate::metrics::MetricsTracker;
use crate::resource::{Pooled, ResourceMetadata};

/// Point-in-time view of a pool, taken under a single lock acquisition.
///
/// Diagnostics only: the numbers may be stale as soon as the lock is released.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub available_to_create: usize,
    pub total_available: usize,
    /// Threads currently blocked waiting for a resource
    pub waiters: usize,
    /// Idle resources, most recently returned last
    pub resources: Vec<ResourceMetadata>,
}

struct QueueState<R> {
    /// LIFO stack: the warmest resource sits at the end
    idle: Vec<Pooled<R>>,
    created: usize,
    next_id: u64,
    waiters: usize,
}

impl<R> QueueState<R> {
    /// Give back the creation slot of a resource that left the pool for good.
    fn release_slot(&mut self) {
        debug_assert!(self.created > 0, "released more creation slots than were taken");
        self.created = self.created.saturating_sub(1);
    }
}

/// Thread-safe stack of idle resources that creates at most `max_size` of them,
/// lazily, the first time a poll finds nothing idle.
///
/// Resources are owned by value: whoever polled one holds the only copy until
/// it is added back, so nothing can reach a resource after it was returned or
/// closed.
pub(crate) struct BoundedResourceQueue<M: ManageResource> {
    manager: M,
    state: Mutex<QueueState<M::Resource>>,
    available: Condvar,
    max_size: usize,
    metrics: Arc<MetricsTracker>,
}

impl<M: ManageResource> BoundedResourceQueue<M> {
    pub(crate) fn new(manager: M, max_size: usize, metrics: Arc<MetricsTracker>) -> Self {
        Self {
            manager,
            state: Mutex::new(QueueState {
                idle: Vec::with_capacity(max_size),
                created: 0,
                next_id: 0,
                waiters: 0,
            }),
            available: Condvar::new(),
            max_size,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    /// Return a polled resource to the idle stack and wake one waiter.
    pub(crate) fn add(&self, resource: Pooled<M::Resource>) {
        let mut state = self.state.lock();
        debug_assert!(state.idle.len() < state.created, "more idle resources than were created");
        tracing::trace!(id = resource.id(), "resource returned to idle stack");
        state.idle.push(resource);
        self.available.notify_one();
    }

    /// Take the most recently returned idle resource, create one if capacity
    /// allows, or wait up to `timeout` for either to become possible.
    pub(crate) fn poll(&self, timeout: Duration) -> PoolResult<Pooled<M::Resource>, M::Error> {
        let start = Instant::now();
        let mut state = self.state.lock();

        loop {
            if let Some(mut resource) = state.idle.pop() {
                resource.touch();
                tracing::trace!(id = resource.id(), "reusing idle resource");
                return Ok(resource);
            }

            if state.created < self.max_size {
                return self.create(&mut state);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                MetricsTracker::incr(&self.metrics.timeouts);
                tracing::debug!(?timeout, max_size = self.max_size, "timed out waiting for a resource");
                return Err(PoolError::Timeout(timeout));
            }

            // `wait_for` hands the lock back on wakeup and on timeout alike, so
            // the count is always restored before the re-check above.
            state.waiters += 1;
            let _ = self.available.wait_for(&mut state, timeout - elapsed);
            state.waiters -= 1;
        }
    }

    fn create(&self, state: &mut QueueState<M::Resource>) -> PoolResult<Pooled<M::Resource>, M::Error> {
        match self.manager.create() {
            Ok(resource) => {
                let id = state.next_id;
                state.next_id += 1;
                state.created += 1;
                MetricsTracker::incr(&self.metrics.created);
                tracing::debug!(id, created = state.created, max_size = self.max_size, "created resource");
                Ok(Pooled::new(id, resource))
            }
            Err(err) => {
                MetricsTracker::incr(&self.metrics.factory_failures);
                tracing::debug!(error = %err, "resource factory failed");
                Err(PoolError::Factory(err))
            }
        }
    }

    fn close(&self, resource: &Pooled<M::Resource>) {
        if let Err(err) = self.manager.close(resource) {
            MetricsTracker::incr(&self.metrics.close_failures);
            tracing::warn!(id = resource.id(), error = %err, "failed to close resource");
        }
    }

    /// Close the idle resource with the given id and release its creation slot.
    ///
    /// Returns `false` when no idle resource has that id, e.g. because it is
    /// checked out.
    pub(crate) fn delete(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.idle.iter().position(|r| r.id() == id) else {
            return false;
        };
        let resource = state.idle.remove(pos);
        self.close(&resource);
        state.release_slot();
        self.available.notify_one();
        tracing::debug!(id, "deleted idle resource");
        true
    }

    /// Evict and close every idle resource unused for at least `idle_timeout`.
    ///
    /// Runs entirely under the queue lock so it cannot interleave with a
    /// concurrent poll or add. Close failures are logged and the resource is
    /// dropped regardless.
    pub(crate) fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();

        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
            .into_iter()
            .partition(|r| r.is_idle_expired(idle_timeout, now));
        state.idle = kept;

        if expired.is_empty() {
            return 0;
        }

        for resource in &expired {
            self.close(resource);
            state.release_slot();
            self.available.notify_one();
        }

        let evicted = expired.len();
        MetricsTracker::add(&self.metrics.evicted, evicted as u64);
        tracing::debug!(evicted, remaining_idle = state.idle.len(), "evicted idle resources");
        evicted
    }

    pub(crate) fn total_available(&self) -> usize {
        let state = self.state.lock();
        self.max_size - state.created + state.idle.len()
    }

    pub(crate) fn available_to_create(&self) -> usize {
        self.max_size - self.state.lock().created
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }

    #[cfg(test)]
    pub(crate) fn created(&self) -> usize {
        self.state.lock().created
    }

    pub(crate) fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            available_to_create: self.max_size - state.created,
            total_available: self.max_size - state.created + state.idle.len(),
            waiters: state.waiters,
            resources: state.idle.iter().map(|r| r.metadata()).collect(),
        }
    }
}

impl<M: ManageResource> Drop for BoundedResourceQueue<M> {
    // Runs once the pool, its reaper and every outstanding lease are gone.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let idle = std::mem::take(&mut state.idle);
        if idle.is_empty() {
            return;
        }
        for resource in &idle {
            self.close(resource);
        }
        tracing::debug!(closed = idle.len(), "closed idle resources on shutdown");
    }
}

//! The resource pool facade: reentrant checkout, leases and scoped use

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::manager::ManageResource;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::queue::{BoundedResourceQueue, PoolStats};
use crate::reaper::IdleReaper;
use crate::resource::{Pooled, ResourceMetadata};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Storage for the resource a thread has checked out, shared by its nested checkouts.
type Slot<R> = Arc<Mutex<Option<Pooled<R>>>>;

struct Held<R> {
    slot: Slot<R>,
    metadata: ResourceMetadata,
    /// Open checkouts on this thread, detached ones included
    depth: usize,
    /// Checkouts waiting for an explicit [`ResourcePool::checkin`]
    detached: usize,
}

/// One checkout of the calling thread's resource.
///
/// Nested checkouts on a thread share its resource, which goes back to the
/// pool when the last of them ends. Dropping the guard ends the checkout.
/// The guard cannot be cloned or sent to another thread, so the resource is
/// unreachable once it has been returned.
///
/// Access is exclusive and checked at runtime, the way `RefCell` does it: while
/// one guard borrows the resource, the others on the same thread cannot.
pub struct Checkout<'a, M: ManageResource> {
    pool: &'a ResourcePool<M>,
    slot: Slot<M::Resource>,
    metadata: ResourceMetadata,
    detached: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a, M: ManageResource> Checkout<'a, M> {
    fn new(pool: &'a ResourcePool<M>, slot: Slot<M::Resource>, metadata: ResourceMetadata) -> Self {
        Self {
            pool,
            slot,
            metadata,
            detached: false,
            _thread_bound: PhantomData,
        }
    }

    pub fn metadata(&self) -> ResourceMetadata {
        self.metadata
    }

    /// Exclusive access to the resource.
    ///
    /// # Panics
    ///
    /// Panics if another checkout on this thread is borrowing it right now.
    pub fn borrow_mut(&self) -> MappedMutexGuard<'_, M::Resource> {
        match self.try_borrow_mut() {
            Some(resource) => resource,
            None => panic!("pooled resource is already borrowed on this thread"),
        }
    }

    /// Exclusive access to the resource, or `None` while another checkout on
    /// this thread is borrowing it.
    pub fn try_borrow_mut(&self) -> Option<MappedMutexGuard<'_, M::Resource>> {
        // Only the owning thread ever locks the slot, so a held lock means a
        // live borrow further up this thread's stack.
        let slot = self.slot.try_lock()?;
        MutexGuard::try_map(slot, |pooled| pooled.as_deref_mut()).ok()
    }

    /// Keep the checkout open after the guard is gone.
    ///
    /// The thread then owes one [`ResourcePool::checkin`]. A thread that exits
    /// without paying it keeps the resource, and its creation slot, for the
    /// rest of the pool's life.
    pub fn detach(mut self) {
        if let Some(mut held) = self.pool.inner.held.get_mut(&thread::current().id()) {
            held.detached += 1;
        }
        self.detached = true;
    }
}

impl<M: ManageResource> fmt::Debug for Checkout<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("id", &self.metadata.id)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

impl<M: ManageResource> Drop for Checkout<'_, M> {
    fn drop(&mut self) {
        if !self.detached
            && let Err(err) = self.pool.release(false)
        {
            tracing::warn!(id = self.metadata.id, error = %err, "checkin on drop failed");
        }
    }
}

/// A resource owned by the lease itself rather than by the calling thread,
/// returned to the pool when the lease is dropped.
///
/// Leases are not reentrant: every lease occupies its own slot. They can be
/// moved across threads and held over `.await` points.
pub struct Lease<M: ManageResource> {
    resource: Option<Pooled<M::Resource>>,
    queue: Arc<BoundedResourceQueue<M>>,
    metrics: Arc<MetricsTracker>,
}

impl<M: ManageResource> Lease<M> {
    fn new(
        resource: Pooled<M::Resource>,
        queue: Arc<BoundedResourceQueue<M>>,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self {
            resource: Some(resource),
            queue,
            metrics,
        }
    }

    fn pooled(&self) -> &Pooled<M::Resource> {
        // Only `drop` takes the resource out.
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("lease used after release"),
        }
    }

    pub fn metadata(&self) -> ResourceMetadata {
        self.pooled().metadata()
    }
}

impl<M: ManageResource> Deref for Lease<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        &**self.pooled()
    }
}

impl<M: ManageResource> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.resource {
            Some(resource) => &mut **resource,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<M: ManageResource> fmt::Debug for Lease<M>
where
    M::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&self.resource).finish()
    }
}

impl<M: ManageResource> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.queue.add(resource);
            MetricsTracker::incr(&self.metrics.checkins);
        }
    }
}

struct PoolInner<M: ManageResource> {
    // Dropped first: the reaper thread must stop before the queue goes away
    // and closes what is left idle.
    reaper: Option<IdleReaper>,
    queue: Arc<BoundedResourceQueue<M>>,
    held: DashMap<ThreadId, Held<M::Resource>>,
    config: PoolConfiguration,
    metrics: Arc<MetricsTracker>,
}

/// Thread-safe, bounded pool of lazily created resources
///
/// Checkouts through [`checkout`](Self::checkout) are reentrant per thread: a
/// thread that already holds a resource gets the same one back without
/// touching the queue, and the resource is returned when the outermost
/// checkout ends. Cloning the pool is cheap and shares the same resources.
/// Idle resources are closed when the last clone and the last lease are gone.
///
/// # Examples
///
/// ```
/// use respool::{FnManager, PoolConfiguration, ResourcePool};
/// use std::io;
///
/// let pool = ResourcePool::new(
///     FnManager::new(|| Ok::<_, io::Error>(String::from("conn")), |_: &String| Ok(())),
///     PoolConfiguration::new().with_max_size(2),
/// )
/// .unwrap();
///
/// let len = pool.scoped_use(None, |conn| conn.len()).unwrap();
/// assert_eq!(len, 4);
/// assert_eq!(pool.stats().total_available, 2);
/// ```
pub struct ResourcePool<M: ManageResource> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageResource> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageResource> ResourcePool<M> {
    /// Create a pool and start its reaper.
    ///
    /// No resources are created until the first checkout.
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self, M::Error> {
        config.validate::<M::Error>()?;

        let metrics = Arc::new(MetricsTracker::new());
        let queue = Arc::new(BoundedResourceQueue::new(
            manager,
            config.max_size,
            Arc::clone(&metrics),
        ));

        let reaper = if config.reaping_enabled() {
            let reaper = IdleReaper::spawn(
                Arc::clone(&queue),
                config.reaping_frequency,
                config.idle_timeout,
            )
            .map_err(|e| PoolError::ReaperSpawn(e.to_string()))?;
            Some(reaper)
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                reaper,
                queue,
                held: DashMap::new(),
                config,
                metrics,
            }),
        })
    }

    /// Check out a resource for the calling thread
    ///
    /// Waits up to `timeout` (the configured `connection_timeout` when `None`).
    /// Nested calls from the same thread share the held resource and never wait.
    ///
    /// The checkout ends when the returned guard is dropped, including during
    /// unwinding. A [detached](Checkout::detach) checkout instead stays open
    /// until [`checkin`](Self::checkin) is called on the same thread; if the
    /// thread exits first, the resource and its creation slot are lost to the
    /// pool. Prefer the guard, [`scoped_use`](Self::scoped_use) or a
    /// [`Lease`] when the matching checkin is not certain.
    pub fn checkout(&self, timeout: Option<Duration>) -> PoolResult<Checkout<'_, M>, M::Error> {
        let context = thread::current().id();

        if let Some(mut held) = self.inner.held.get_mut(&context) {
            held.depth += 1;
            MetricsTracker::incr(&self.inner.metrics.reentrant_checkouts);
            tracing::trace!(id = held.metadata.id, depth = held.depth, "reentrant checkout");
            return Ok(Checkout::new(self, Arc::clone(&held.slot), held.metadata));
        }

        let resource = self.inner.queue.poll(self.timeout_or_default(timeout))?;
        let metadata = resource.metadata();
        let slot = Arc::new(Mutex::new(Some(resource)));
        self.inner.held.insert(
            context,
            Held {
                slot: Arc::clone(&slot),
                metadata,
                depth: 1,
                detached: 0,
            },
        );
        MetricsTracker::incr(&self.inner.metrics.checkouts);
        Ok(Checkout::new(self, slot, metadata))
    }

    /// End one detached checkout made by the calling thread
    ///
    /// The resource goes back to the pool once every nested checkout has
    /// ended. Fails with [`PoolError::InvalidCheckin`] when the thread has no
    /// detached checkout open.
    pub fn checkin(&self) -> PoolResult<(), M::Error> {
        self.release(true)
    }

    fn release(&self, detached: bool) -> PoolResult<(), M::Error> {
        let context = thread::current().id();

        let released = match self.inner.held.entry(context) {
            Entry::Vacant(_) => return Err(PoolError::InvalidCheckin),
            Entry::Occupied(mut entry) => {
                let held = entry.get_mut();
                if detached {
                    if held.detached == 0 {
                        return Err(PoolError::InvalidCheckin);
                    }
                    held.detached -= 1;
                }
                held.depth -= 1;
                if held.depth > 0 {
                    None
                } else {
                    // No guard is left to borrow the slot.
                    let slot = entry.remove().slot;
                    slot.lock().take()
                }
            }
        };

        MetricsTracker::incr(&self.inner.metrics.checkins);
        if let Some(resource) = released {
            self.inner.queue.add(resource);
        }
        Ok(())
    }

    /// Nesting depth of the calling thread's checkout; zero when it holds nothing.
    pub fn checkout_depth(&self) -> usize {
        self.inner
            .held
            .get(&thread::current().id())
            .map_or(0, |held| held.depth)
    }

    /// Run `body` with exclusive access to a checked-out resource and check it
    /// back in afterwards, whether `body` returns or panics.
    ///
    /// The resource stays borrowed for the whole of `body`, so a nested
    /// `scoped_use` on the same thread fails with [`PoolError::ResourceBusy`]
    /// instead of waiting for a second slot.
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{FnManager, PoolConfiguration, ResourcePool};
    /// use std::io;
    ///
    /// let pool = ResourcePool::new(
    ///     FnManager::new(|| Ok::<_, io::Error>(Vec::<u32>::new()), |_: &Vec<u32>| Ok(())),
    ///     PoolConfiguration::new().with_max_size(1),
    /// )
    /// .unwrap();
    ///
    /// pool.scoped_use(None, |log| log.push(1)).unwrap();
    /// let len = pool.scoped_use(None, |log| { log.push(2); log.len() }).unwrap();
    /// assert_eq!(len, 2);
    /// ```
    pub fn scoped_use<T, F>(&self, timeout: Option<Duration>, body: F) -> PoolResult<T, M::Error>
    where
        F: FnOnce(&mut M::Resource) -> T,
    {
        let checkout = self.checkout(timeout)?;
        let mut resource = checkout.try_borrow_mut().ok_or(PoolError::<M::Error>::ResourceBusy)?;
        Ok(body(&mut resource))
    }

    /// Check out a resource owned by the returned lease rather than by the
    /// calling thread.
    pub fn lease(&self, timeout: Option<Duration>) -> PoolResult<Lease<M>, M::Error> {
        let resource = self.inner.queue.poll(self.timeout_or_default(timeout))?;
        MetricsTracker::incr(&self.inner.metrics.checkouts);
        Ok(Lease::new(
            resource,
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.metrics),
        ))
    }

    /// Lease a resource from async code without blocking the runtime.
    ///
    /// The wait runs on tokio's blocking pool and the lease is built there, so
    /// dropping this future mid-wait never loses a resource: a lease that
    /// arrives too late is dropped and its resource goes straight back.
    pub async fn lease_async(&self, timeout: Option<Duration>) -> PoolResult<Lease<M>, M::Error> {
        let timeout = self.timeout_or_default(timeout);
        let queue = Arc::clone(&self.inner.queue);
        let metrics = Arc::clone(&self.inner.metrics);

        tokio::task::spawn_blocking(move || -> PoolResult<Lease<M>, M::Error> {
            let resource = queue.poll(timeout)?;
            MetricsTracker::incr(&metrics.checkouts);
            Ok(Lease::new(resource, queue, metrics))
        })
        .await
        .map_err(|_| PoolError::Cancelled)?
    }

    /// Run an async `body` with a leased resource, returning it when `body`
    /// completes or the returned future is dropped.
    pub async fn scoped_use_async<T, F>(&self, timeout: Option<Duration>, body: F) -> PoolResult<T, M::Error>
    where
        F: AsyncFnOnce(&mut M::Resource) -> T,
    {
        let mut lease = self.lease_async(timeout).await?;
        Ok(body(&mut *lease).await)
    }

    /// Point-in-time capacity figures and the metadata of every idle resource.
    pub fn stats(&self) -> PoolStats {
        self.inner.queue.snapshot()
    }

    pub fn total_available(&self) -> usize {
        self.inner.queue.total_available()
    }

    pub fn available_to_create(&self) -> usize {
        self.inner.queue.available_to_create()
    }

    /// Threads currently blocked in a checkout or lease.
    pub fn waiters(&self) -> usize {
        self.inner.queue.waiters()
    }

    /// Run one eviction sweep now, with the configured idle timeout.
    pub fn reap_now(&self) -> usize {
        self.inner.queue.reap_idle(self.inner.config.idle_timeout)
    }

    /// Close every idle resource, freeing their creation slots.
    pub fn close_idle(&self) -> usize {
        self.inner.queue.reap_idle(Duration::ZERO)
    }

    /// Close the idle resource with the given id and free its creation slot.
    ///
    /// Returns `false` if no idle resource has that id.
    pub fn delete(&self, id: u64) -> bool {
        self.inner.queue.delete(id)
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    pub fn reaper(&self) -> Option<&IdleReaper> {
        self.inner.reaper.as_ref()
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let stats = self.stats();
        let created = self.inner.config.max_size - stats.available_to_create;
        self.inner.metrics.get_metrics(
            stats.resources.len(),
            created,
            stats.waiters,
            self.inner.config.max_size,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.inner.config.connection_timeout)
    }
}

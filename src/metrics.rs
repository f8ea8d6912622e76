//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use respool::{FnManager, PoolConfiguration, ResourcePool};
/// use std::io;
///
/// let pool = ResourcePool::new(
///     FnManager::new(|| Ok::<_, io::Error>(1_u8), |_: &u8| Ok(())),
///     PoolConfiguration::default(),
/// )
/// .unwrap();
///
/// pool.scoped_use(None, |conn| *conn += 1).unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.checkouts, 1);
/// assert_eq!(metrics.checkins, 1);
/// assert_eq!(metrics.created, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Checkouts served by the queue
    pub checkouts: u64,

    /// Checkouts served from the calling thread's own slot
    pub reentrant_checkouts: u64,

    /// Successful checkins, nested ones included
    pub checkins: u64,

    /// Resources constructed by the factory
    pub created: u64,

    /// Polls that gave up at their deadline
    pub timeouts: u64,

    /// Factory calls that returned an error
    pub factory_failures: u64,

    /// Idle resources removed by the reaper or a drain
    pub evicted: u64,

    /// Close calls that failed during eviction
    pub close_failures: u64,

    /// Resources currently sitting idle
    pub idle: usize,

    /// Resources currently checked out
    pub in_use: usize,

    /// Creation slots still free
    pub available_to_create: usize,

    /// Threads blocked waiting for a resource
    pub waiters: usize,

    pub max_size: usize,

    /// Checked-out share of capacity (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("checkouts".to_string(), self.checkouts.to_string());
        metrics.insert("reentrant_checkouts".to_string(), self.reentrant_checkouts.to_string());
        metrics.insert("checkins".to_string(), self.checkins.to_string());
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("factory_failures".to_string(), self.factory_failures.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("in_use".to_string(), self.in_use.to_string());
        metrics.insert("available_to_create".to_string(), self.available_to_create.to_string());
        metrics.insert("waiters".to_string(), self.waiters.to_string());
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus the given tags.
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{FnManager, PoolConfiguration, ResourcePool};
    /// use std::collections::HashMap;
    /// use std::io;
    ///
    /// let pool = ResourcePool::new(
    ///     FnManager::new(|| Ok::<_, io::Error>(()), |_: &()| Ok(())),
    ///     PoolConfiguration::default(),
    /// )
    /// .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "cache".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("redis", Some(&tags)).unwrap();
    /// assert!(output.contains("respool_resources_in_use"));
    /// assert!(output.contains("service=\"cache\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

        let mut labels = HashMap::new();
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        labels.insert("pool".to_string(), pool_name.to_string());
        let registry = Registry::new_custom(Some("respool".to_string()), Some(labels))?;

        let gauges = [
            ("resources_idle", "Resources currently idle", metrics.idle),
            ("resources_in_use", "Resources currently checked out", metrics.in_use),
            ("resources_available_to_create", "Creation slots still free", metrics.available_to_create),
            ("resources_max", "Pool capacity", metrics.max_size),
            ("waiters", "Threads blocked waiting for a resource", metrics.waiters),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let counters = [
            ("checkouts_total", "Checkouts served by the queue", metrics.checkouts),
            ("reentrant_checkouts_total", "Checkouts served from the caller's own slot", metrics.reentrant_checkouts),
            ("checkins_total", "Successful checkins", metrics.checkins),
            ("created_total", "Resources constructed", metrics.created),
            ("timeouts_total", "Checkouts that hit their deadline", metrics.timeouts),
            ("factory_failures_total", "Failed resource constructions", metrics.factory_failures),
            ("evicted_total", "Idle resources evicted", metrics.evicted),
            ("close_failures_total", "Failed closes during eviction", metrics.close_failures),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help)?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub checkouts: AtomicU64,
    pub reentrant_checkouts: AtomicU64,
    pub checkins: AtomicU64,
    pub created: AtomicU64,
    pub timeouts: AtomicU64,
    pub factory_failures: AtomicU64,
    pub evicted: AtomicU64,
    pub close_failures: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, idle: usize, created: usize, waiters: usize, max_size: usize) -> PoolMetrics {
        let in_use = created.saturating_sub(idle);
        let utilization = if max_size > 0 {
            in_use as f64 / max_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            reentrant_checkouts: self.reentrant_checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            idle,
            in_use,
            available_to_create: max_size.saturating_sub(created),
            waiters,
            max_size,
            utilization,
        }
    }
}

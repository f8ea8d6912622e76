//! # respool
//!
//! A bounded, thread-safe pool of reusable resource handles, typically
//! connections to a backing network service.
//!
//! ## Features
//!
//! - Lazy creation: resources are built on first demand, never more than `max_size`
//! - Blocking checkout with a deadline, measured on a monotonic clock
//! - LIFO reuse so the most recently used resource is handed out first
//! - Reentrant per-thread checkout: nested checkouts on one thread share one resource
//! - Single ownership: a returned resource is unreachable from its old checkout
//! - RAII leases, including a cancellation-safe async variant for tokio
//! - Background reaper that closes resources left idle too long
//! - Metrics with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use respool::{FnManager, PoolConfiguration, ResourcePool};
//! use std::io;
//!
//! let manager = FnManager::new(
//!     || Ok::<_, io::Error>(vec![0_u8; 16]),
//!     |_buf: &Vec<u8>| Ok(()),
//! );
//! let pool = ResourcePool::new(manager, PoolConfiguration::default()).unwrap();
//!
//! let len = pool.scoped_use(None, |buf| {
//!     buf.push(1);
//!     buf.len()
//! }).unwrap();
//! assert_eq!(len, 17);
//!
//! let stats = pool.stats();
//! assert_eq!(stats.available_to_create, 4);
//! assert_eq!(stats.total_available, 5);
//! ```

mod config;
mod errors;
mod manager;
mod metrics;
mod pool;
mod queue;
mod reaper;
mod resource;

pub use config::PoolConfiguration;
pub use errors::{PoolError, PoolResult};
pub use manager::{FnManager, ManageResource};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Checkout, Lease, ResourcePool};
pub use queue::PoolStats;
pub use reaper::IdleReaper;
pub use resource::ResourceMetadata;

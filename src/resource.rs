//! Pooled resources and their lifecycle metadata

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// Snapshot of a pooled resource's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// Per-pool identifier, assigned at creation and never reused
    pub id: u64,
    pub created_at: Instant,
    /// Last time the resource was handed out by the queue
    pub last_used_at: Instant,
}

impl ResourceMetadata {
    /// How long the resource has gone without being handed out.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}

/// A resource owned by a pool, together with its metadata.
///
/// Exactly one owner at a time: the idle stack, a thread's checkout slot or a lease.
pub(crate) struct Pooled<R> {
    id: u64,
    created_at: Instant,
    last_used_at: Instant,
    resource: R,
}

impl<R> Pooled<R> {
    pub fn new(id: u64, resource: R) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            resource,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metadata(&self) -> ResourceMetadata {
        ResourceMetadata {
            id: self.id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }

    pub fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub fn is_idle_expired(&self, idle_timeout: Duration, now: Instant) -> bool {
        self.metadata().idle_for(now) >= idle_timeout
    }
}

impl<R> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<R> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.resource
    }
}

impl<R: fmt::Debug> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("last_used_at", &self.last_used_at)
            .field("resource", &self.resource)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_last_used_forward() {
        let mut pooled = Pooled::new(3, String::from("conn"));
        let before = pooled.metadata();
        std::thread::sleep(Duration::from_millis(5));
        pooled.touch();
        pooled.push('!');

        let after = pooled.metadata();
        assert!(after.last_used_at > before.last_used_at);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(*pooled, "conn!");
        assert_eq!(pooled.id(), 3);
    }

    #[test]
    fn zero_idle_timeout_expires_immediately() {
        let pooled = Pooled::new(0, ());
        assert!(pooled.is_idle_expired(Duration::ZERO, Instant::now()));
        assert!(!pooled.is_idle_expired(Duration::from_secs(60), Instant::now()));
    }
}

//! Pool configuration options

use std::time::Duration;

use crate::errors::PoolError;

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use respool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_size(10)
///     .with_connection_timeout(Duration::from_secs(2))
///     .with_idle_timeout(Duration::from_secs(60));
///
/// assert_eq!(config.max_size, 10);
/// assert_eq!(config.reaping_frequency, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of resources the pool will ever hold at once
    pub max_size: usize,

    /// Default wait bound for a checkout
    #[cfg_attr(feature = "serde", serde(with = "seconds"))]
    pub connection_timeout: Duration,

    /// How long a resource may sit idle before the reaper closes it
    #[cfg_attr(feature = "serde", serde(with = "seconds"))]
    pub idle_timeout: Duration,

    /// Period of the reaper; zero disables reaping
    #[cfg_attr(feature = "serde", serde(with = "seconds"))]
    pub reaping_frequency: Duration,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_size: 5,
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(100),
            reaping_frequency: Duration::from_secs(300),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the default checkout timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle eviction threshold
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the reaper period
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new().with_reaping_frequency(Duration::ZERO);
    /// assert!(!config.reaping_enabled());
    /// ```
    pub fn with_reaping_frequency(mut self, frequency: Duration) -> Self {
        self.reaping_frequency = frequency;
        self
    }

    pub fn reaping_enabled(&self) -> bool {
        !self.reaping_frequency.is_zero()
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate<E>(&self) -> Result<(), PoolError<E>> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durations as (fractional) seconds, the unit operators write by hand.
#[cfg(feature = "serde")]
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

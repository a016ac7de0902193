//! Engine configuration structures.
//!
//! These structures define the rotation schedule of a table family and the
//! worker pool that decodes and merges shard results.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CLOCK_SKEW_MARGIN, DEFAULT_ROTATION_PERIOD, DEFAULT_WORKER_THREADS,
    DEFAULT_WORKER_THREAD_NAME,
};

/// Top-level engine configuration.
///
/// # Example
///
/// ```rust
/// use rotor_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.rotation.num_shards, 1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rotation schedule.
    pub rotation: RotationConfig,

    /// Worker pool configuration.
    pub executor: ExecutorConfig,
}

impl EngineConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), String> {
        self.rotation.validate()?;
        self.executor.validate()
    }
}

/// Rotation schedule of a table family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Number of shards in the rotation. 1 disables rotation.
    /// Default: 1
    pub num_shards: usize,

    /// How long each shard stays current.
    /// Default: 1d
    #[serde(with = "humantime_serde")]
    pub rotation_period: Duration,

    /// Maximum age of live data. Enables the expiration shrink when set.
    /// Default: none
    #[serde(with = "humantime_serde::option")]
    pub expiration_period: Option<Duration>,

    /// Explicit number of shards to query, used by the
    /// "from rotation config" range policy.
    /// Default: none
    pub query_range: Option<usize>,

    /// Padding added to expiration comparisons to absorb clock drift.
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub clock_skew_margin: Duration,

    /// Start of the first rotation period, in milliseconds since the Unix
    /// epoch. Shard 0 is current during the first period.
    /// Default: 0
    pub epoch_millis: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            rotation_period: DEFAULT_ROTATION_PERIOD,
            expiration_period: None,
            query_range: None,
            clock_skew_margin: DEFAULT_CLOCK_SKEW_MARGIN,
            epoch_millis: 0,
        }
    }
}

impl RotationConfig {
    /// Creates a configuration for `num_shards` shards rotating every
    /// `rotation_period`.
    #[must_use]
    pub fn new(num_shards: usize, rotation_period: Duration) -> Self {
        Self {
            num_shards,
            rotation_period,
            ..Default::default()
        }
    }

    /// Sets the expiration period.
    #[must_use]
    pub fn expiration_period(mut self, period: Duration) -> Self {
        self.expiration_period = Some(period);
        self
    }

    /// Sets the explicit query range.
    #[must_use]
    pub fn query_range(mut self, range: usize) -> Self {
        self.query_range = Some(range);
        self
    }

    /// Sets the clock skew margin.
    #[must_use]
    pub fn clock_skew_margin(mut self, margin: Duration) -> Self {
        self.clock_skew_margin = margin;
        self
    }

    /// Sets the rotation epoch.
    #[must_use]
    pub fn epoch_millis(mut self, epoch_millis: u64) -> Self {
        self.epoch_millis = epoch_millis;
        self
    }

    /// Returns true if the table family rotates.
    #[must_use]
    pub fn is_rotating(&self) -> bool {
        self.num_shards > 1
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_shards == 0 {
            return Err("num_shards must be at least 1".to_string());
        }

        if i32::try_from(self.num_shards).is_err() {
            return Err("num_shards does not fit a shard id".to_string());
        }

        if self.rotation_period.is_zero() {
            return Err("rotation_period must be greater than 0".to_string());
        }

        if let Some(range) = self.query_range {
            if range == 0 {
                return Err("query_range must be positive".to_string());
            }
        }

        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    /// Default: 4
    pub worker_threads: usize,

    /// Thread name prefix.
    /// Default: "rotor-worker"
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".to_string());
        }
        if self.thread_name.is_empty() {
            return Err("thread_name must not be empty".to_string());
        }
        Ok(())
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Same format for optional durations.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| humantime::format_duration(d).to_string())
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

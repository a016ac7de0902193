//! Rotation state providers.
//!
//! A provider turns a table family's rotation configuration and the current
//! time into a [`RotationState`]. States are computed on every call and
//! never cached, since rotation is a function of elapsed wall-clock time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rotor_common::config::RotationConfig;
use rotor_common::types::{RotationState, ShardId};

use crate::error::{ClientError, ClientResult};

/// Computes the rotation state of a table family.
pub trait RotationInfoProvider: Send + Sync + 'static {
    /// Number of shards in the rotation.
    fn num_shards(&self) -> usize;

    /// Computes the state at `now`.
    fn rotation_state_at(&self, now: SystemTime) -> ClientResult<RotationState>;

    /// Computes the state from the current wall-clock time.
    fn rotation_state(&self) -> ClientResult<RotationState> {
        self.rotation_state_at(SystemTime::now())
    }
}

/// Provider deriving the current shard from a fixed epoch and period.
///
/// Shard 0 is current during the first period after the epoch, shard 1
/// during the second, wrapping around after `num_shards` periods.
#[derive(Debug, Clone)]
pub struct WallClockRotation {
    config: RotationConfig,
}

impl WallClockRotation {
    /// Creates a provider from a validated configuration.
    pub fn new(config: RotationConfig) -> ClientResult<Self> {
        config.validate().map_err(ClientError::Configuration)?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    fn epoch(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.config.epoch_millis)
    }
}

impl RotationInfoProvider for WallClockRotation {
    fn num_shards(&self) -> usize {
        self.config.num_shards
    }

    fn rotation_state_at(&self, now: SystemTime) -> ClientResult<RotationState> {
        // Clocks behind the epoch behave as if the first period just began.
        let since_epoch = now.duration_since(self.epoch()).unwrap_or(Duration::ZERO);
        let period = self.config.rotation_period.as_nanos();
        let periods = since_epoch.as_nanos() / period;
        let current = usize::try_from(periods % self.config.num_shards as u128)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let elapsed = u64::try_from(since_epoch.as_nanos() % period)
            .map(Duration::from_nanos)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        RotationState::new(
            self.config.num_shards,
            ShardId::from_index(current),
            elapsed,
            self.config.rotation_period,
        )
        .map_err(ClientError::Configuration)
    }
}

/// Provider returning a fixed state, for pinned deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticRotation {
    state: RotationState,
}

impl StaticRotation {
    /// Creates a provider that always reports `state`.
    pub fn new(state: RotationState) -> Self {
        Self { state }
    }
}

impl RotationInfoProvider for StaticRotation {
    fn num_shards(&self) -> usize {
        self.state.num_shards()
    }

    fn rotation_state_at(&self, _now: SystemTime) -> ClientResult<RotationState> {
        Ok(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn at(offset: Duration) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(1_000_000) + offset
    }

    fn provider() -> WallClockRotation {
        WallClockRotation::new(RotationConfig::new(3, HOUR).epoch_millis(1_000_000)).unwrap()
    }

    #[test]
    fn test_first_period_is_shard_zero() {
        let state = provider().rotation_state_at(at(Duration::from_secs(600))).unwrap();
        assert_eq!(state.current_shard(), ShardId::new(0));
        assert_eq!(state.elapsed_in_current(), Duration::from_secs(600));
        assert_eq!(
            state.ordered_shard_ids(),
            &[ShardId::new(0), ShardId::new(2), ShardId::new(1)]
        );
    }

    #[test]
    fn test_rotation_advances_and_wraps() {
        let p = provider();
        let state = p.rotation_state_at(at(HOUR * 2 + Duration::from_secs(30 * 60))).unwrap();
        assert_eq!(state.current_shard(), ShardId::new(2));
        assert_eq!(state.elapsed_in_current(), Duration::from_secs(30 * 60));
        assert_eq!(
            state.ordered_shard_ids(),
            &[ShardId::new(2), ShardId::new(1), ShardId::new(0)]
        );

        let wrapped = p.rotation_state_at(at(HOUR * 3)).unwrap();
        assert_eq!(wrapped.current_shard(), ShardId::new(0));
        assert_eq!(wrapped.elapsed_in_current(), Duration::ZERO);
    }

    #[test]
    fn test_clock_before_epoch() {
        let state = provider().rotation_state_at(UNIX_EPOCH).unwrap();
        assert_eq!(state.current_shard(), ShardId::FIRST);
        assert_eq!(state.elapsed_in_current(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = WallClockRotation::new(RotationConfig::new(0, HOUR)).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_static_rotation() {
        let state = RotationState::new(2, ShardId::new(1), HOUR, HOUR).unwrap();
        let p = StaticRotation::new(state.clone());
        assert_eq!(p.num_shards(), 2);
        assert_eq!(p.rotation_state().unwrap(), state);
    }
}

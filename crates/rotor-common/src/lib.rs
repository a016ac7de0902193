//! # rotor-common
//!
//! Common types, configuration and constants for rotor.
//!
//! rotor executes queries against time-rotated shards of a wide-column
//! store. This crate holds the pieces shared by every layer of the engine:
//!
//! - **Types**: shard identifiers, consistency levels, bound values and the
//!   computed `RotationState`
//! - **Config**: rotation and executor configuration structures
//! - **Constants**: engine-wide defaults
//!
//! ## Example
//!
//! ```rust
//! use rotor_common::types::{RotationState, ShardId};
//! use std::time::Duration;
//!
//! let state = RotationState::new(
//!     3,
//!     ShardId::new(2),
//!     Duration::from_secs(600),
//!     Duration::from_secs(3600),
//! )
//! .unwrap();
//! assert_eq!(state.ordered_shard_ids()[0], ShardId::new(2));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{EngineConfig, ExecutorConfig, RotationConfig};
pub use constants::*;
pub use types::{ConsistencyLevel, RotationState, ShardId, Value};

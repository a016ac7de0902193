//! Type definitions for rotor.
//!
//! This module contains the core types shared by the resolver, the binder
//! and the executor.

mod consistency;
mod ids;
mod rotation;
mod value;

pub use consistency::ConsistencyLevel;
pub use ids::ShardId;
pub use rotation::RotationState;
pub use value::Value;

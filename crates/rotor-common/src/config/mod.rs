//! Configuration for rotor.
//!
//! This module provides the rotation and executor configuration structures.

mod engine;

pub use engine::{EngineConfig, ExecutorConfig, RotationConfig};

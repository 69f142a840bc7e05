//! Trajectory types, errors, and generation.
//!
//! This module provides:
//! - [`types::StepRecord`], [`types::Trajectory`] -- the data recorded for each
//!   episode, serialized as a JSON array of step records.
//! - [`generator::TrajectoryGenerator`] -- the orchestration layer that drives
//!   policy-environment interaction loops, including replay-based branching.
//! - [`errors::TrajectoryError`] -- everything generation and loading can fail with.

pub mod errors;
pub mod generator;
pub mod types;

// Re-export the most commonly used items at the module level.
pub use errors::TrajectoryError;
pub use generator::{derive_seed, TrajectoryGenerator};
pub use types::{action_name, StepRecord, Trajectory};

//! Agent module: the action-selection policies that drive episodes.
//!
//! The [`BiasedRandomPolicy`] mostly picks from a short list of movement and
//! common commands and otherwise samples the full action space.

pub mod policy;

// Re-export the primary types for convenient access.
pub use policy::{ActionPolicy, BiasedRandomPolicy, COMMON_ACTIONS, MOVEMENT_ACTIONS};

//! hackview: a small harness around the NetHack Learning Environment.
//!
//! Drives a biased random agent through NetHack, records every step's screen,
//! status, action and reward as a JSON trajectory, and serves stored
//! trajectories over a minimal web API.

pub mod agent;
pub mod config;
pub mod env;
pub mod render;
pub mod server;
pub mod store;
pub mod trajectory;

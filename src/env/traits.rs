//! Core environment trait and shared types.
//!
//! Every NetHack environment (the NLE bridge client, the scripted mock) implements
//! the [`Environment`] trait so that the trajectory generator can drive episodes
//! uniformly.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Index into `blstats` that holds the in-game turn counter.
pub const BLSTATS_TURN_INDEX: usize = 20;

/// Number of entries NLE reports in the bottom-line status vector.
pub const BLSTATS_LEN: usize = 27;

/// A raw observation as produced by the environment.
///
/// Mirrors the NLE observation dictionary restricted to the keys this crate reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Character grid, one byte per cell, row-major.
    pub chars: Vec<Vec<u8>>,
    /// Color grid with the same shape as `chars`.
    #[serde(default)]
    pub colors: Vec<Vec<u8>>,
    /// Null-terminated top-line message buffer.
    pub message: Vec<u8>,
    /// Bottom-line status vector.
    pub blstats: Vec<i64>,
}

/// The result of executing one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: RawObservation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    #[serde(default)]
    pub info: serde_json::Value,
}

impl StepOutcome {
    /// Whether the episode is over, for either reason.
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A discrete action space `{0, 1, ..., n - 1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpace {
    pub n: u32,
}

impl ActionSpace {
    pub fn new(n: u32) -> Self {
        Self { n }
    }

    /// Draw a uniformly random legal action.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.gen_range(0..self.n)
    }

    pub fn contains(&self, action: u32) -> bool {
        action < self.n
    }
}

/// The environment capability the generator consumes.
///
/// Implementations own whatever backing resource they need (an HTTP session, a
/// scripted dungeon) and must release it in [`Environment::close`].
#[allow(async_fn_in_trait)]
pub trait Environment: Send + Sync {
    /// Start a new episode, optionally seeding the game.
    async fn reset(&mut self, seed: Option<u64>) -> anyhow::Result<RawObservation>;

    /// Execute an action and return the resulting transition.
    async fn step(&mut self, action: u32) -> anyhow::Result<StepOutcome>;

    /// Release the environment. Calling it twice is a no-op.
    async fn close(&mut self) -> anyhow::Result<()>;

    /// The legal action space.
    fn action_space(&self) -> ActionSpace;

    /// The registry id this instance was created from (e.g. `NetHackScore-v0`).
    fn env_id(&self) -> &str;

    /// Draw a uniformly random legal action.
    fn sample_action<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.action_space().sample(rng)
    }
}

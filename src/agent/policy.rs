//! Action-selection policies.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::env::traits::{ActionSpace, RawObservation};

/// The eight compass directions in the NLE action set.
pub const MOVEMENT_ACTIONS: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Frequently useful commands (more, search, ...) in the NLE action set.
pub const COMMON_ACTIONS: [u32; 8] = [0, 9, 10, 12, 13, 14, 15, 16];

/// Probability of picking from the curated list instead of the full space.
pub const CURATED_PROBABILITY: f64 = 0.7;

/// What the generator needs from an agent.
///
/// Policies carry no learning state; all randomness comes from the `rng` the
/// caller supplies, so a seeded caller gets a reproducible action sequence.
pub trait ActionPolicy: Send + Sync {
    fn act<R: Rng + ?Sized>(
        &self,
        observation: &RawObservation,
        action_space: ActionSpace,
        rng: &mut R,
    ) -> u32;
}

/// Uniform mixture of a curated allow-list and the full action space.
#[derive(Debug, Clone)]
pub struct BiasedRandomPolicy {
    curated: Vec<u32>,
    curated_probability: f64,
}

impl BiasedRandomPolicy {
    pub fn new() -> Self {
        Self {
            curated: MOVEMENT_ACTIONS
                .iter()
                .chain(COMMON_ACTIONS.iter())
                .copied()
                .collect(),
            curated_probability: CURATED_PROBABILITY,
        }
    }

    pub fn curated_actions(&self) -> &[u32] {
        &self.curated
    }
}

impl Default for BiasedRandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionPolicy for BiasedRandomPolicy {
    fn act<R: Rng + ?Sized>(
        &self,
        _observation: &RawObservation,
        action_space: ActionSpace,
        rng: &mut R,
    ) -> u32 {
        if rng.gen::<f64>() < self.curated_probability {
            if let Some(&action) = self.curated.choose(rng) {
                return action;
            }
        }
        action_space.sample(rng)
    }
}

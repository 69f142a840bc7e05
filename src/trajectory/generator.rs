//! Trajectory generation: driving the policy through an environment.
//!
//! The [`TrajectoryGenerator`] runs episodes by repeatedly:
//!   1. rendering the current observation,
//!   2. asking the policy for an action,
//!   3. stepping the environment,
//!   4. recording the (observation, action, reward, flags) record.
//!
//! It supports two modes:
//! - **Fresh generation** via [`TrajectoryGenerator::generate`].
//! - **Branching** via [`TrajectoryGenerator::continue_from`], which replays a
//!   recorded prefix to reach a step and then keeps generating from there.
//!
//! Environments cannot be snapshotted, so branching relies on replay. This
//! assumes the environment is fully deterministic given (reset seed, action
//! sequence). Any hidden source of randomness in the environment (for example
//! an internal generator seeded from the wall clock) silently lands the replay
//! in a different state. Every replayed observation is therefore compared with
//! the recording; mismatches are logged, and rejected in strict mode.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

use super::errors::TrajectoryError;
use super::types::{action_name, StepRecord, Trajectory};
use crate::agent::{ActionPolicy, BiasedRandomPolicy};
use crate::env::{AnyEnv, EnvRegistry, Environment, RawObservation};
use crate::render::render_observation;

/// Derive a replay seed from a trajectory prefix.
///
/// SHA-256 of the prefix's JSON serialization, first four bytes read
/// big-endian. Different prefixes may collide; nothing detects that.
pub fn derive_seed(prefix: &[StepRecord]) -> Result<u32, TrajectoryError> {
    let json = serde_json::to_vec(prefix)?;
    let digest = Sha256::digest(&json);
    Ok(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

/// Upper bound on records reserved up front; budgets come from requests.
const PREALLOCATE_LIMIT: usize = 1024;

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Generates trajectories with a policy against environments from a registry.
#[derive(Debug, Clone)]
pub struct TrajectoryGenerator<P = BiasedRandomPolicy> {
    registry: EnvRegistry,
    policy: P,
    strict_replay: bool,
}

impl TrajectoryGenerator<BiasedRandomPolicy> {
    /// Create a generator using the default biased random policy.
    pub fn new(registry: EnvRegistry) -> Self {
        Self::with_policy(registry, BiasedRandomPolicy::new())
    }
}

impl<P: ActionPolicy> TrajectoryGenerator<P> {
    pub fn with_policy(registry: EnvRegistry, policy: P) -> Self {
        Self {
            registry,
            policy,
            strict_replay: false,
        }
    }

    /// Reject continuations whose replay does not reproduce the recording.
    pub fn strict_replay(mut self, strict: bool) -> Self {
        self.strict_replay = strict;
        self
    }

    pub fn registry(&self) -> &EnvRegistry {
        &self.registry
    }

    /// Generate a fresh trajectory of at most `step_budget` steps.
    pub async fn generate(
        &self,
        env_id: &str,
        step_budget: usize,
        seed: Option<u64>,
    ) -> Result<Trajectory, TrajectoryError> {
        let mut rng = seeded_rng(seed);
        let mut env = self.registry.make(env_id).await?;

        let result = async {
            let obs = env.reset(seed).await?;
            let mut trajectory = Trajectory::with_capacity(step_budget.min(PREALLOCATE_LIMIT));
            self.extend(&mut env, obs, &mut trajectory, step_budget, None, &mut rng)
                .await?;
            Ok::<_, TrajectoryError>(trajectory)
        }
        .await;

        release(&mut env, result).await
    }

    /// Branch `existing` at `from_step` and generate `additional_steps` more.
    ///
    /// The records `[0, from_step]` are copied verbatim; every new record carries
    /// `branch_from_step = from_step`. Without an explicit `seed`, the reset seed
    /// is derived from the prefix with [`derive_seed`].
    pub async fn continue_from(
        &self,
        env_id: &str,
        existing: &Trajectory,
        from_step: usize,
        additional_steps: usize,
        seed: Option<u64>,
    ) -> Result<Trajectory, TrajectoryError> {
        if from_step >= existing.len() {
            return Err(TrajectoryError::StepOutOfRange {
                from_step,
                len: existing.len(),
            });
        }
        let prefix = &existing.steps()[..=from_step];
        let seed = match seed {
            Some(seed) => seed,
            None => u64::from(derive_seed(prefix)?),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut env = self.registry.make(env_id).await?;

        let result = async {
            let obs = self.replay(&mut env, prefix, seed).await?;
            let mut trajectory =
                Trajectory::with_capacity(prefix.len() + additional_steps.min(PREALLOCATE_LIMIT));
            for record in prefix {
                trajectory.push(record.clone());
            }
            self.extend(
                &mut env,
                obs,
                &mut trajectory,
                additional_steps,
                Some(from_step),
                &mut rng,
            )
            .await?;
            Ok::<_, TrajectoryError>(trajectory)
        }
        .await;

        release(&mut env, result).await
    }

    // -- internal helpers ---------------------------------------------------

    /// Reset with `seed` and re-issue the recorded actions of `prefix`.
    ///
    /// Returns the observation reached after the last replayed action.
    async fn replay(
        &self,
        env: &mut AnyEnv,
        prefix: &[StepRecord],
        seed: u64,
    ) -> Result<RawObservation, TrajectoryError> {
        tracing::info!(
            steps = prefix.len(),
            seed,
            "Replaying to reach continuation point"
        );

        let mut obs = env.reset(Some(seed)).await?;
        let mut diverged = false;

        for (index, record) in prefix.iter().enumerate() {
            if render_observation(&obs)? != record.observation {
                if self.strict_replay {
                    return Err(TrajectoryError::ReplayDiverged { step: index });
                }
                if !diverged {
                    tracing::warn!(
                        step = index,
                        seed,
                        "Replayed observation differs from the recording; continuing anyway"
                    );
                    diverged = true;
                }
            }

            let outcome = env.step(record.action).await?;
            if outcome.is_done() {
                return Err(TrajectoryError::ReplayEnded { step: index });
            }
            obs = outcome.observation;
        }

        Ok(obs)
    }

    /// Append up to `budget` policy-driven records to `trajectory`, starting from
    /// `obs`. Stops early when the episode terminates or truncates.
    async fn extend(
        &self,
        env: &mut AnyEnv,
        obs: RawObservation,
        trajectory: &mut Trajectory,
        budget: usize,
        branch_from_step: Option<usize>,
        rng: &mut StdRng,
    ) -> Result<(), TrajectoryError> {
        let first_index = trajectory.len();
        let mut obs = obs;

        for offset in 0..budget {
            let step = first_index + offset;
            let observation = render_observation(&obs)?;
            let action = self.policy.act(&obs, env.action_space(), rng);

            let outcome = env.step(action).await?;
            let done = outcome.is_done();

            trajectory.push(StepRecord {
                step,
                observation,
                action,
                action_name: action_name(action),
                reward: outcome.reward,
                terminated: outcome.terminated,
                truncated: outcome.truncated,
                branch_from_step,
            });

            if done {
                tracing::info!(
                    step,
                    env_id = env.env_id(),
                    terminated = outcome.terminated,
                    "Game ended"
                );
                break;
            }
            obs = outcome.observation;
        }

        Ok(())
    }
}

/// Close `env` and pass `result` through. A failed close is logged, not raised,
/// so it never masks the outcome of the episode.
async fn release<T>(
    env: &mut AnyEnv,
    result: Result<T, TrajectoryError>,
) -> Result<T, TrajectoryError> {
    if let Err(err) = env.close().await {
        tracing::warn!(env_id = env.env_id(), error = %err, "Failed to close environment");
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

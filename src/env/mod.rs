//! Environment abstractions, concrete implementations, and the id-keyed factory.
//!
//! Every environment implements the [`Environment`] trait so that the trajectory
//! generator can interact with it uniformly.
//!
//! Included environments:
//! - [`nethack::NetHackEnv`] -- a session on an external NLE bridge server.
//! - [`nethack::MockNetHackEnv`] -- a seeded scripted dungeon, making it
//!   possible to test generation and replay without the real game.

pub mod errors;
pub mod nethack;
pub mod traits;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

pub use errors::EnvError;
pub use traits::{ActionSpace, Environment, RawObservation, StepOutcome};

use crate::config::EnvSettings;
use nethack::{MockNetHackEnv, NetHackEnv};

/// Environment ids the factory accepts.
pub const KNOWN_ENV_IDS: &[&str] = &[
    "NetHackScore-v0",
    "NetHackStaircase-v0",
    "NetHackStaircasePet-v0",
    "NetHackOracle-v0",
    "NetHackGold-v0",
    "NetHackEat-v0",
    "NetHackScout-v0",
    "NetHackChallenge-v0",
    "NetHack-v0",
];

/// Size of the reduced action set used by the NLE task environments.
const TASK_ACTIONS: u32 = 23;
/// Size of the full keyboard action set (`NetHack-v0`, `NetHackChallenge-v0`).
const FULL_ACTIONS: u32 = 121;

// ---------------------------------------------------------------------------
// AnyEnv: enum dispatch wrapper for dynamic environment selection
// ---------------------------------------------------------------------------

/// An enum wrapper around all concrete environment types, enabling runtime
/// selection without `dyn` (which is incompatible with async trait methods).
#[derive(Debug)]
pub enum AnyEnv {
    NetHack(NetHackEnv),
    Mock(MockNetHackEnv),
}

impl Environment for AnyEnv {
    async fn reset(&mut self, seed: Option<u64>) -> Result<RawObservation> {
        match self {
            Self::NetHack(e) => e.reset(seed).await,
            Self::Mock(e) => e.reset(seed).await,
        }
    }

    async fn step(&mut self, action: u32) -> Result<StepOutcome> {
        match self {
            Self::NetHack(e) => e.step(action).await,
            Self::Mock(e) => e.step(action).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::NetHack(e) => e.close().await,
            Self::Mock(e) => e.close().await,
        }
    }

    fn action_space(&self) -> ActionSpace {
        match self {
            Self::NetHack(e) => e.action_space(),
            Self::Mock(e) => e.action_space(),
        }
    }

    fn env_id(&self) -> &str {
        match self {
            Self::NetHack(e) => e.env_id(),
            Self::Mock(e) => e.env_id(),
        }
    }

    fn sample_action<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match self {
            Self::NetHack(e) => e.sample_action(rng),
            Self::Mock(e) => e.sample_action(rng),
        }
    }
}

// ---------------------------------------------------------------------------
// EnvRegistry: the factory keyed by environment id
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Backend {
    Bridge { base_url: String, timeout: Duration },
    Mock { max_steps: usize },
}

/// Creates fresh environment instances by id.
///
/// Every instance returned by [`EnvRegistry::make`] is owned by its caller, who
/// must close it.
#[derive(Debug, Clone)]
pub struct EnvRegistry {
    backend: Backend,
    open_sessions: Arc<AtomicUsize>,
}

impl EnvRegistry {
    /// A registry whose environments are sessions on the NLE bridge at `base_url`.
    pub fn bridge(base_url: &str, timeout: Duration) -> Self {
        Self {
            backend: Backend::Bridge {
                base_url: base_url.to_string(),
                timeout,
            },
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A registry of [`MockNetHackEnv`]s truncating after `max_steps` steps.
    pub fn mock(max_steps: usize) -> Self {
        Self {
            backend: Backend::Mock { max_steps },
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_settings(settings: &EnvSettings) -> Self {
        if settings.mock {
            Self::mock(settings.mock_max_steps)
        } else {
            Self::bridge(
                &settings.bridge_url,
                Duration::from_secs(settings.request_timeout_secs),
            )
        }
    }

    pub fn is_known(env_id: &str) -> bool {
        KNOWN_ENV_IDS.contains(&env_id)
    }

    /// Create a fresh environment instance for `env_id`.
    pub async fn make(&self, env_id: &str) -> Result<AnyEnv> {
        if !Self::is_known(env_id) {
            return Err(EnvError::UnknownEnv(env_id.to_string()).into());
        }
        match &self.backend {
            Backend::Bridge { base_url, timeout } => {
                let env = NetHackEnv::connect(base_url, env_id, *timeout).await?;
                Ok(AnyEnv::NetHack(env))
            }
            Backend::Mock { max_steps } => {
                let num_actions = match env_id {
                    "NetHack-v0" | "NetHackChallenge-v0" => FULL_ACTIONS,
                    _ => TASK_ACTIONS,
                };
                let env = MockNetHackEnv::new(env_id, num_actions, *max_steps)
                    .with_session_gauge(self.open_sessions.clone());
                Ok(AnyEnv::Mock(env))
            }
        }
    }

    /// Number of mock sessions created by this registry that are still open.
    ///
    /// Bridge sessions are tracked by the bridge itself and are not counted.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_rejects_unknown_ids() {
        let registry = EnvRegistry::mock(10);
        let err = registry.make("Pong-v5").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::UnknownEnv(id)) if id == "Pong-v5"
        ));
    }

    #[tokio::test]
    async fn registry_sizes_action_space_by_env() {
        let registry = EnvRegistry::mock(10);
        let mut score = registry.make("NetHackScore-v0").await.unwrap();
        let mut full = registry.make("NetHack-v0").await.unwrap();
        assert_eq!(score.action_space().n, TASK_ACTIONS);
        assert_eq!(full.action_space().n, FULL_ACTIONS);
        assert_eq!(full.env_id(), "NetHack-v0");
        assert_eq!(registry.open_sessions(), 2);

        score.close().await.unwrap();
        full.close().await.unwrap();
        assert_eq!(registry.open_sessions(), 0);
    }
}

//! NetHack environments.
//!
//! The real game runs inside the NetHack Learning Environment, which is hosted by
//! an external bridge process. This module provides two implementations:
//! - [`NetHackEnv`] talks to the NLE bridge via HTTP.
//! - [`MockNetHackEnv`] generates a seeded single-room dungeon for tests and
//!   offline demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::errors::EnvError;
use super::traits::{
    ActionSpace, Environment, RawObservation, StepOutcome, BLSTATS_LEN, BLSTATS_TURN_INDEX,
};

/// Rows in the NLE map grid.
pub const MAP_ROWS: usize = 21;
/// Columns in the NLE map grid.
pub const MAP_COLS: usize = 79;
/// Size of the NLE message buffer.
pub const MESSAGE_LEN: usize = 256;

// ---------------------------------------------------------------------------
// HTTP-backed NLE environment
// ---------------------------------------------------------------------------

/// An NLE environment hosted by an external bridge server.
///
/// The bridge is expected to expose:
/// - `POST {base_url}/make`                  -- body: `{"env_id": "<id>"}`
/// - `POST {base_url}/sessions/{id}/reset`   -- body: `{"seed": <optional int>}`
/// - `POST {base_url}/sessions/{id}/step`    -- body: `{"action": <int>}`
/// - `DELETE {base_url}/sessions/{id}`
///
/// A session that is dropped without [`Environment::close`] (for example when
/// the future driving it is cancelled) is deleted from a background task.
#[derive(Debug)]
pub struct NetHackEnv {
    base_url: String,
    env_id: String,
    http: reqwest::Client,
    session_id: String,
    action_space: ActionSpace,
    done: bool,
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct MakeResponse {
    session_id: String,
    num_actions: u32,
}

#[derive(Debug, Deserialize)]
struct ResetResponse {
    observation: RawObservation,
    #[serde(default)]
    #[allow(dead_code)]
    info: serde_json::Value,
}

impl NetHackEnv {
    /// Create a new session for `env_id` on the bridge at `base_url`.
    pub async fn connect(base_url: &str, env_id: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the NLE bridge")?;

        let made: MakeResponse = http
            .post(format!("{base_url}/make"))
            .json(&serde_json::json!({ "env_id": env_id }))
            .send()
            .await
            .context("failed to reach NLE bridge on make")?
            .error_for_status()
            .with_context(|| format!("NLE bridge refused to create {env_id}"))?
            .json()
            .await
            .context("failed to parse NLE make response")?;

        tracing::debug!(
            env_id,
            session = %made.session_id,
            actions = made.num_actions,
            "NLE session created"
        );

        let env = Self {
            base_url,
            env_id: env_id.to_string(),
            http,
            session_id: made.session_id,
            action_space: ActionSpace::new(made.num_actions),
            done: false,
            closed: false,
        };
        if made.num_actions == 0 {
            // Dropping `env` deletes the session on the bridge.
            anyhow::bail!("NLE bridge reported an empty action space for {env_id}");
        }
        Ok(env)
    }

    fn session_url(&self, suffix: &str) -> String {
        format!("{}/sessions/{}{}", self.base_url, self.session_id, suffix)
    }
}

impl Environment for NetHackEnv {
    async fn reset(&mut self, seed: Option<u64>) -> Result<RawObservation> {
        if self.closed {
            return Err(EnvError::Closed.into());
        }
        self.done = false;

        let resp: ResetResponse = self
            .http
            .post(self.session_url("/reset"))
            .json(&serde_json::json!({ "seed": seed }))
            .send()
            .await
            .context("failed to reach NLE bridge on reset")?
            .error_for_status()
            .context("NLE bridge rejected reset")?
            .json()
            .await
            .context("failed to parse NLE reset response")?;

        tracing::debug!(env_id = %self.env_id, ?seed, "NLE env reset");
        Ok(resp.observation)
    }

    async fn step(&mut self, action: u32) -> Result<StepOutcome> {
        if self.closed {
            return Err(EnvError::Closed.into());
        }
        if self.done {
            return Err(EnvError::EpisodeOver.into());
        }

        let outcome: StepOutcome = self
            .http
            .post(self.session_url("/step"))
            .json(&serde_json::json!({ "action": action }))
            .send()
            .await
            .context("failed to reach NLE bridge on step")?
            .error_for_status()
            .context("NLE bridge rejected step")?
            .json()
            .await
            .context("failed to parse NLE step response")?;

        self.done = outcome.is_done();
        Ok(outcome)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.http
            .delete(self.session_url(""))
            .send()
            .await
            .context("failed to reach NLE bridge on close")?
            .error_for_status()
            .context("NLE bridge rejected close")?;
        tracing::debug!(env_id = %self.env_id, session = %self.session_id, "NLE session closed");
        Ok(())
    }

    fn action_space(&self) -> ActionSpace {
        self.action_space
    }

    fn env_id(&self) -> &str {
        &self.env_id
    }
}

impl Drop for NetHackEnv {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                env_id = %self.env_id,
                session = %self.session_id,
                "NLE session dropped outside a runtime; not released"
            );
            return;
        };

        let request = self.http.delete(self.session_url(""));
        let session = std::mem::take(&mut self.session_id);
        runtime.spawn(async move {
            match request.send().await.and_then(|resp| resp.error_for_status()) {
                Ok(_) => tracing::debug!(%session, "Released abandoned NLE session"),
                Err(err) => tracing::warn!(
                    %session,
                    error = %err,
                    "Failed to release abandoned NLE session"
                ),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Mock NetHack environment
// ---------------------------------------------------------------------------

/// Grid offsets for the eight compass actions, indexed by `action - 1`.
///
/// Order follows NLE: N, E, S, W, NE, SE, SW, NW.
const COMPASS: [(i32, i32); 8] = [
    (-1, 0),
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 1),
    (1, 1),
    (1, -1),
    (-1, -1),
];

/// Chance per step that a hidden trap fires.
const TRAP_CHANCE: f64 = 0.02;

const STARTING_HP: i64 = 14;

/// A seeded stand-in for NLE: one lit room with gold and a downstair.
///
/// Fully deterministic given the reset seed and the action sequence, which is
/// the property replay-based branching relies on. Rewards are the gold picked
/// up, as in `NetHackScore-v0`.
#[derive(Debug)]
pub struct MockNetHackEnv {
    env_id: String,
    action_space: ActionSpace,
    max_steps: usize,
    rng: StdRng,
    map: Vec<Vec<u8>>,
    player: (usize, usize),
    hp: i64,
    gold: i64,
    turn: i64,
    steps_taken: usize,
    message: String,
    done: bool,
    closed: bool,
    /// Shared gauge of sessions that have not been closed yet.
    open_sessions: Option<Arc<AtomicUsize>>,
}

impl MockNetHackEnv {
    pub fn new(env_id: &str, num_actions: u32, max_steps: usize) -> Self {
        Self {
            env_id: env_id.to_string(),
            action_space: ActionSpace::new(num_actions),
            max_steps,
            rng: StdRng::seed_from_u64(0),
            map: vec![vec![b' '; MAP_COLS]; MAP_ROWS],
            player: (0, 0),
            hp: STARTING_HP,
            gold: 0,
            turn: 1,
            steps_taken: 0,
            message: String::new(),
            done: true,
            closed: false,
            open_sessions: None,
        }
    }

    /// Count this instance in `gauge` until it is closed.
    pub fn with_session_gauge(mut self, gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        self.open_sessions = Some(gauge);
        self
    }

    fn build_level(&mut self) {
        self.map = vec![vec![b' '; MAP_COLS]; MAP_ROWS];

        let top = self.rng.gen_range(2..6);
        let left = self.rng.gen_range(3..30);
        let height = self.rng.gen_range(6..10);
        let width = self.rng.gen_range(15..35);
        let bottom = top + height - 1;
        let right = left + width - 1;

        for col in left..=right {
            self.map[top][col] = b'-';
            self.map[bottom][col] = b'-';
        }
        for row in top + 1..bottom {
            self.map[row][left] = b'|';
            self.map[row][right] = b'|';
            for col in left + 1..right {
                self.map[row][col] = b'.';
            }
        }

        let floor_cell = |rng: &mut StdRng| {
            (
                rng.gen_range(top + 1..bottom),
                rng.gen_range(left + 1..right),
            )
        };
        for _ in 0..3 {
            let (r, c) = floor_cell(&mut self.rng);
            self.map[r][c] = b'$';
        }
        let (r, c) = floor_cell(&mut self.rng);
        self.map[r][c] = b'>';
        self.player = floor_cell(&mut self.rng);
    }

    fn observe(&self) -> RawObservation {
        let mut chars = self.map.clone();
        let mut colors: Vec<Vec<u8>> = self
            .map
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&c| match c {
                        b'$' => 11,
                        b' ' => 0,
                        _ => 7,
                    })
                    .collect()
            })
            .collect();
        let (pr, pc) = self.player;
        chars[pr][pc] = b'@';
        colors[pr][pc] = 15;

        let mut message = self.message.as_bytes().to_vec();
        message.truncate(MESSAGE_LEN);
        message.resize(MESSAGE_LEN, 0);

        let mut blstats = vec![0i64; BLSTATS_LEN];
        blstats[0] = pc as i64;
        blstats[1] = pr as i64;
        blstats[2] = 16; // strength
        blstats[9] = self.gold; // score
        blstats[10] = self.hp;
        blstats[11] = STARTING_HP;
        blstats[12] = 1; // depth
        blstats[13] = self.gold;
        blstats[18] = 1; // experience level
        blstats[BLSTATS_TURN_INDEX] = self.turn;

        RawObservation {
            chars,
            colors,
            message,
            blstats,
        }
    }

    /// Apply `action` and return (reward, terminated).
    fn apply(&mut self, action: u32) -> (f64, bool) {
        let mut reward = 0.0;
        self.message.clear();

        if (1..=8).contains(&action) {
            let (dr, dc) = COMPASS[(action - 1) as usize];
            let (pr, pc) = self.player;
            let nr = pr as i32 + dr;
            let nc = pc as i32 + dc;
            let outside = nr < 0 || nc < 0 || nr as usize >= MAP_ROWS || nc as usize >= MAP_COLS;
            let target = if outside {
                b' '
            } else {
                self.map[nr as usize][nc as usize]
            };
            match target {
                b'.' | b'$' | b'>' => {
                    self.player = (nr as usize, nc as usize);
                    if target == b'$' {
                        let amount = self.rng.gen_range(1..=50);
                        self.gold += amount;
                        reward = amount as f64;
                        self.message = format!("{amount} gold pieces.");
                        self.map[nr as usize][nc as usize] = b'.';
                    } else if target == b'>' {
                        self.message = "There is a staircase down here.".into();
                    }
                }
                _ => self.message = "You cannot pass through the wall.".into(),
            }
        } else {
            self.message = match action {
                0 => String::new(),
                9 => "You search the area.".into(),
                _ => "Never mind.".into(),
            };
        }

        if self.rng.gen_bool(TRAP_CHANCE) {
            let damage = self.rng.gen_range(1..=6);
            self.hp -= damage;
            self.message = "You are hit by a little dart!".into();
        }

        let terminated = self.hp <= 0;
        if terminated {
            self.message = "You die...".into();
        }
        (reward, terminated)
    }
}

impl Environment for MockNetHackEnv {
    async fn reset(&mut self, seed: Option<u64>) -> Result<RawObservation> {
        if self.closed {
            return Err(EnvError::Closed.into());
        }
        self.rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.hp = STARTING_HP;
        self.gold = 0;
        self.turn = 1;
        self.steps_taken = 0;
        self.done = false;
        self.build_level();
        self.message = "Hello Agent, welcome to NetHack!  You are a neutral male human Valkyrie."
            .into();

        tracing::debug!(env_id = %self.env_id, ?seed, "mock NetHack env reset");
        Ok(self.observe())
    }

    async fn step(&mut self, action: u32) -> Result<StepOutcome> {
        if self.closed {
            return Err(EnvError::Closed.into());
        }
        if self.done {
            return Err(EnvError::EpisodeOver.into());
        }
        if !self.action_space.contains(action) {
            return Err(EnvError::InvalidAction {
                action,
                n: self.action_space.n,
            }
            .into());
        }

        self.steps_taken += 1;
        self.turn += 1;
        let (reward, terminated) = self.apply(action);
        let truncated = !terminated && self.steps_taken >= self.max_steps;
        self.done = terminated || truncated;

        Ok(StepOutcome {
            observation: self.observe(),
            reward,
            terminated,
            truncated,
            info: serde_json::json!({ "steps_taken": self.steps_taken }),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if let Some(gauge) = &self.open_sessions {
                gauge.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn action_space(&self) -> ActionSpace {
        self.action_space
    }

    fn env_id(&self) -> &str {
        &self.env_id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Address of an in-process NLE bridge and the number of sessions it has
    /// been asked to delete.
    pub(crate) struct StubBridge {
        pub url: String,
        pub deletes: Arc<AtomicUsize>,
    }

    fn blank_observation() -> RawObservation {
        RawObservation {
            chars: vec![vec![b' '; MAP_COLS]; MAP_ROWS],
            colors: vec![vec![0; MAP_COLS]; MAP_ROWS],
            message: vec![0; MESSAGE_LEN],
            blstats: vec![0; BLSTATS_LEN],
        }
    }

    /// Serve a minimal bridge on an ephemeral port. Every step stalls for
    /// `step_delay` before answering.
    pub(crate) async fn spawn_stub_bridge(num_actions: u32, step_delay: Duration) -> StubBridge {
        use axum::routing::{delete, post};
        use axum::{Json, Router};

        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = deletes.clone();
        let app = Router::new()
            .route(
                "/make",
                post(move || async move {
                    Json(serde_json::json!({ "session_id": "s1", "num_actions": num_actions }))
                }),
            )
            .route(
                "/sessions/{id}/reset",
                post(|| async { Json(serde_json::json!({ "observation": blank_observation() })) }),
            )
            .route(
                "/sessions/{id}/step",
                post(move || async move {
                    tokio::time::sleep(step_delay).await;
                    Json(serde_json::json!({
                        "observation": blank_observation(),
                        "reward": 0.0,
                        "terminated": false,
                        "truncated": false,
                    }))
                }),
            )
            .route(
                "/sessions/{id}",
                delete(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        StubBridge { url, deletes }
    }

    async fn play(seed: u64, actions: &[u32]) -> Vec<StepOutcome> {
        let mut env = MockNetHackEnv::new("NetHackScore-v0", 23, 100);
        env.reset(Some(seed)).await.unwrap();
        let mut out = Vec::new();
        for &a in actions {
            let outcome = env.step(a).await.unwrap();
            let done = outcome.is_done();
            out.push(outcome);
            if done {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn mock_reset_has_nle_shape() {
        let mut env = MockNetHackEnv::new("NetHackScore-v0", 23, 100);
        let obs = env.reset(Some(42)).await.unwrap();
        assert_eq!(obs.chars.len(), MAP_ROWS);
        assert!(obs.chars.iter().all(|row| row.len() == MAP_COLS));
        assert_eq!(obs.colors.len(), MAP_ROWS);
        assert_eq!(obs.message.len(), MESSAGE_LEN);
        assert_eq!(obs.blstats.len(), BLSTATS_LEN);
        assert_eq!(obs.blstats[BLSTATS_TURN_INDEX], 1);
        assert_eq!(obs.chars.iter().flatten().filter(|&&c| c == b'@').count(), 1);
    }

    #[tokio::test]
    async fn mock_is_deterministic_per_seed() {
        let actions = [1, 2, 3, 4, 5, 6, 7, 8, 9, 2, 2, 2, 3, 3];
        let a = play(11, &actions).await;
        let b = play(11, &actions).await;
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.observation, y.observation);
            assert_eq!(x.reward, y.reward);
        }
    }

    #[tokio::test]
    async fn mock_truncates_at_max_steps() {
        let mut env = MockNetHackEnv::new("NetHackScore-v0", 23, 3);
        env.reset(Some(5)).await.unwrap();
        let mut last = None;
        for _ in 0..3 {
            let outcome = env.step(0).await.unwrap();
            if outcome.terminated {
                return; // unlucky trap sequence; nothing to check
            }
            last = Some(outcome);
        }
        assert!(last.unwrap().truncated);
        assert!(env.step(0).await.is_err());
    }

    #[tokio::test]
    async fn mock_rejects_out_of_range_action() {
        let mut env = MockNetHackEnv::new("NetHackScore-v0", 23, 10);
        env.reset(Some(1)).await.unwrap();
        assert!(env.step(23).await.is_err());
    }

    #[tokio::test]
    async fn session_gauge_tracks_close() {
        let gauge = Arc::new(AtomicUsize::new(0));
        let mut env =
            MockNetHackEnv::new("NetHackScore-v0", 23, 10).with_session_gauge(gauge.clone());
        assert_eq!(gauge.load(Ordering::SeqCst), 1);
        env.close().await.unwrap();
        env.close().await.unwrap();
        assert_eq!(gauge.load(Ordering::SeqCst), 0);
        assert!(env.reset(Some(1)).await.is_err());
    }

    #[tokio::test]
    async fn bridge_session_closes_once() {
        let bridge = spawn_stub_bridge(23, Duration::ZERO).await;
        let mut env = NetHackEnv::connect(&bridge.url, "NetHackScore-v0", Duration::from_secs(5))
            .await
            .unwrap();
        let obs = env.reset(Some(3)).await.unwrap();
        assert_eq!(obs.blstats.len(), BLSTATS_LEN);
        env.close().await.unwrap();
        env.close().await.unwrap();
        drop(env);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bridge.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_bridge_session_is_deleted() {
        let bridge = spawn_stub_bridge(23, Duration::ZERO).await;
        let env = NetHackEnv::connect(&bridge.url, "NetHackScore-v0", Duration::from_secs(5))
            .await
            .unwrap();
        drop(env);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bridge.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_action_space_is_rejected() {
        let bridge = spawn_stub_bridge(0, Duration::ZERO).await;
        let err = NetHackEnv::connect(&bridge.url, "NetHackScore-v0", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty action space"), "{err:#}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bridge.deletes.load(Ordering::SeqCst), 1);
    }
}

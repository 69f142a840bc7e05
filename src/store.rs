//! In-memory trajectory store.
//!
//! The [`TrajectoryStore`] maps identifiers to trajectories. It is a cheap,
//! cloneable handle; every clone sees the same table. Writers to the same id
//! race and the last write wins. Nothing is ever evicted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::ActionPolicy;
use crate::trajectory::{Trajectory, TrajectoryGenerator};

/// Id of the trajectory loaded (or generated) at startup.
pub const DEFAULT_TRAJECTORY_ID: &str = "default";

/// Characters of the first message shown in a listing.
pub const PREVIEW_CHARS: usize = 50;

/// One row of [`TrajectoryStore::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySummary {
    pub id: String,
    pub length: usize,
    pub first_message: String,
}

/// Id for a generated trajectory.
pub fn generated_id(seed: u64, steps: i64) -> String {
    format!("traj_{seed}_{steps}")
}

/// Id for an uploaded file: the file name with any `.json` removed.
pub fn uploaded_id(filename: &str) -> String {
    format!("uploaded_{}", filename.replace(".json", ""))
}

/// Id for a continuation of `source_id` branched at `from_step`.
pub fn branch_id(source_id: &str, from_step: usize) -> String {
    format!("branch_{source_id}_{from_step}")
}

/// The first `PREVIEW_CHARS` characters of `message`, with `...` appended only
/// when something was cut.
pub fn preview(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrajectoryStore {
    inner: Arc<RwLock<BTreeMap<String, Trajectory>>>,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the trajectory stored under `id`.
    pub async fn put(&self, id: impl Into<String>, trajectory: Trajectory) {
        let id = id.into();
        tracing::debug!(id = %id, steps = trajectory.len(), "Storing trajectory");
        self.inner.write().await.insert(id, trajectory);
    }

    /// A copy of the trajectory stored under `id`, or `None`.
    pub async fn get(&self, id: &str) -> Option<Trajectory> {
        self.inner.read().await.get(id).cloned()
    }

    /// Summaries of every stored trajectory, ordered by id.
    pub async fn list(&self) -> Vec<TrajectorySummary> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, trajectory)| TrajectorySummary {
                id: id.clone(),
                length: trajectory.len(),
                first_message: trajectory.first_message().map(preview).unwrap_or_default(),
            })
            .collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Load the default trajectory from `path` into `store`, generating and saving
/// one first if the file does not exist.
pub async fn bootstrap_default<P: ActionPolicy>(
    store: &TrajectoryStore,
    generator: &TrajectoryGenerator<P>,
    path: impl AsRef<Path>,
    env_id: &str,
    steps: usize,
    seed: u64,
) -> Result<()> {
    let path = path.as_ref();
    let trajectory = if path.exists() {
        let trajectory = Trajectory::load_from_file(path)
            .with_context(|| format!("Failed to load default trajectory from {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded default trajectory");
        trajectory
    } else {
        tracing::info!(
            path = %path.display(),
            steps,
            seed,
            "No default trajectory found, generating one"
        );
        let trajectory = generator
            .generate(env_id, steps, Some(seed))
            .await
            .context("Failed to generate default trajectory")?;
        trajectory
            .save_to_file(path)
            .with_context(|| format!("Failed to save default trajectory to {}", path.display()))?;
        trajectory
    };

    store.put(DEFAULT_TRAJECTORY_ID, trajectory).await;
    Ok(())
}

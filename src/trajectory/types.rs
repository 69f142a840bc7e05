//! Core trajectory data types.
//!
//! A [`Trajectory`] serializes as a bare JSON array of [`StepRecord`]s, which is
//! also the format of uploaded and bootstrap trajectory files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::TrajectoryError;
use crate::render::RenderedObservation;

// ---------------------------------------------------------------------------
// Single step
// ---------------------------------------------------------------------------

/// One action taken at one point in an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Zero-based index of this step within the trajectory.
    pub step: usize,
    /// The observation the action was chosen from.
    pub observation: RenderedObservation,
    /// The action code sent to the environment.
    pub action: u32,
    /// Display label for `action`.
    pub action_name: String,
    /// Reward for executing the action.
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    /// The step a continuation branched from; absent on unbranched records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_from_step: Option<usize>,
}

impl StepRecord {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Display label for an action code.
pub fn action_name(action: u32) -> String {
    format!("action_{action}")
}

// ---------------------------------------------------------------------------
// Full trajectory
// ---------------------------------------------------------------------------

/// An ordered sequence of step records from one episode or continuation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory {
    steps: Vec<StepRecord>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&StepRecord> {
        self.steps.get(index)
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn push(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// The recorded action codes, in order.
    pub fn actions(&self) -> impl Iterator<Item = u32> + '_ {
        self.steps.iter().map(|s| s.action)
    }

    /// Message shown on the first step, if any.
    pub fn first_message(&self) -> Option<&str> {
        self.steps.first().map(|s| s.observation.message.as_str())
    }

    /// Total reward over all records.
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().map(|s| s.reward).sum()
    }

    /// Whether the episode ended (terminated or truncated) on the last record.
    pub fn ended(&self) -> bool {
        self.steps.last().is_some_and(StepRecord::is_done)
    }

    /// Parse a trajectory from JSON text (an array of step records).
    pub fn from_json(text: &str) -> Result<Self, TrajectoryError> {
        Ok(serde_json::from_str(text)?)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Serialize the trajectory to a pretty-printed JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), TrajectoryError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!(
            path = %path.as_ref().display(),
            steps = self.len(),
            "Saved trajectory"
        );
        Ok(())
    }

    /// Deserialize a trajectory from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, TrajectoryError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let trajectory = Self::from_json(&data)?;
        tracing::info!(
            path = %path.as_ref().display(),
            steps = trajectory.len(),
            "Loaded trajectory"
        );
        Ok(trajectory)
    }
}

impl From<Vec<StepRecord>> for Trajectory {
    fn from(steps: Vec<StepRecord>) -> Self {
        Self { steps }
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(step: usize, message: &str, action: u32) -> StepRecord {
        StepRecord {
            step,
            observation: RenderedObservation {
                screen_text: vec!["-----".into(), "|.@.|".into()],
                message: message.into(),
                stats: vec![0; 27],
                turn: step as i64 + 1,
            },
            action,
            action_name: action_name(action),
            reward: 0.0,
            terminated: false,
            truncated: false,
            branch_from_step: None,
        }
    }

    #[test]
    fn serializes_as_bare_array_without_branch_field() {
        let trajectory = Trajectory::from(vec![record(0, "Hello", 3)]);
        let value = serde_json::to_value(&trajectory).unwrap();
        let first = &value.as_array().unwrap()[0];
        assert_eq!(first["action_name"], "action_3");
        assert_eq!(first["observation"]["message"], "Hello");
        assert!(first.get("branch_from_step").is_none());
    }

    #[test]
    fn parses_python_style_file_content() {
        let text = r#"[{"step": 0,
            "observation": {"screen_text": ["@"], "message": "", "stats": [1, 2], "turn": 1},
            "action": 7, "action_name": "action_7", "reward": 0.0,
            "terminated": false, "truncated": true, "branch_from_step": 4}]"#;
        let trajectory = Trajectory::from_json(text).unwrap();
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.steps()[0].branch_from_step, Some(4));
        assert!(trajectory.ended());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let text = r#"[{"step": 0, "action": 1}]"#;
        assert!(matches!(
            Trajectory::from_json(text),
            Err(TrajectoryError::Json(_))
        ));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let trajectory = Trajectory::from(vec![record(0, "a", 1), record(1, "b", 2)]);
        let tmp = std::env::temp_dir()
            .join(format!("hackview_types_roundtrip_{}.json", std::process::id()));
        trajectory.save_to_file(&tmp).unwrap();
        let loaded = Trajectory::load_from_file(&tmp).unwrap();
        assert_eq!(loaded, trajectory);
        std::fs::remove_file(tmp).ok();
    }
}

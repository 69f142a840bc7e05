use thiserror::Error;

use crate::render::RenderError;

#[derive(Error, Debug)]
pub enum TrajectoryError {
    #[error("from_step {from_step} is beyond trajectory length {len}")]
    StepOutOfRange { from_step: usize, len: usize },
    #[error("game ended during replay at step {step}; cannot continue")]
    ReplayEnded { step: usize },
    #[error("replayed observation differs from the recording at step {step}")]
    ReplayDiverged { step: usize },
    #[error("environment error: {0:#}")]
    Environment(#[from] anyhow::Error),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
    #[error("trajectory file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid trajectory JSON: {0}")]
    Json(#[from] serde_json::Error),
}

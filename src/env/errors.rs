use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("unknown environment id: {0}")]
    UnknownEnv(String),
    #[error("cannot step in a finished episode; call reset first")]
    EpisodeOver,
    #[error("environment has been closed")]
    Closed,
    #[error("action {action} is outside the action space of size {n}")]
    InvalidAction { action: u32, n: u32 },
}

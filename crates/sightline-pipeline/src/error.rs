use sightline_vision::{AssetError, EngineError};
use thiserror::Error;

/// Everything that keeps a pipeline from starting. Nothing here happens
/// mid-stream: once running, failures cost single frames.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

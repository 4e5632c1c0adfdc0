use std::path::PathBuf;

use thiserror::Error;

/// Why a single frame was dropped. The pipeline keeps running after either.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(String),

    #[error("{plane} plane needs {required} bytes but holds {capacity}")]
    BufferBounds {
        plane: &'static str,
        required: usize,
        capacity: usize,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("engine contract mismatch: {0}")]
    Contract(String),

    #[error("malformed engine output: {0}")]
    Malformed(String),

    #[error("inference failed: {0}")]
    Fault(String),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("label file {path} has no labels")]
    NoLabels { path: PathBuf },

    #[error("label file {path} has a blank entry at line {line}")]
    BlankLabel { path: PathBuf, line: usize },

    #[error("model file {path} is empty")]
    EmptyModel { path: PathBuf },
}

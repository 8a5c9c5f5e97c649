use thiserror::Error;

/// All errors produced by mojo-core.
#[derive(Debug, Error)]
pub enum MojoError {
    #[error("ring buffer capacity must be non-zero (got {0})")]
    InvalidCapacity(usize),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("failed to spawn inference worker: {0}")]
    WorkerSpawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MojoError>;

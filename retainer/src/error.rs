use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The retrained network and its snapshot disagree on layer structure.
    #[error("shape mismatch at weight {layer}: {detail}")]
    ShapeMismatch { layer: usize, detail: String },

    /// Evaluation asked for a best checkpoint the current task never wrote.
    #[error("no best checkpoint for task {task} at {}", path.display())]
    MissingCheckpoint { task: usize, path: PathBuf },

    #[error("no parameter named {0}")]
    UnknownParameter(String),

    /// A phase ran before the phase that sets up its inputs.
    #[error("phase {phase} reached out of order: {detail}")]
    PhaseOrder {
        phase: &'static str,
        detail: &'static str,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("invalid dataset: {0}")]
    Dataset(String),

    #[error("metric undefined: {0}")]
    Metric(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

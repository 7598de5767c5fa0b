use std::path::PathBuf;

use thiserror::Error;

use crate::train::phase::Phase;

/// Every failure the library can report.
///
/// Shape and label errors indicate a configuration bug (wrong image size for
/// the architecture, wrong class count) and abort the run; nothing in the
/// training loop retries them.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("{phase} phase saw no samples; cannot compute a mean")]
    EmptyDataset { phase: Phase },

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("label {label} is out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot decode image {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("checkpoint {} failed: {message}", path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("metrics sink error: {0}")]
    Metrics(String),
}

impl TrainError {
    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        TrainError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;

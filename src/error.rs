//! Error types for the re-identification pipeline.
//!
//! ```text
//! ReidError (top-level)
//! ├── ConfigError   (config validation / file loading)
//! ├── shape errors  (dimension / length mismatches)
//! ├── evaluation    (empty gallery, no valid queries)
//! └── checkpoint    (save / load failures, interrupt)
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Convenient `Result` alias used across the crate.
pub type ReidResult<T> = Result<T, ReidError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ReidError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Query and gallery embeddings (or dataset features and the model input)
    /// disagree on width.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Two parallel sequences (e.g. embeddings and their labels) differ in length.
    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Gallery is empty")]
    EmptyGallery,

    #[error("Query set is empty")]
    EmptyQuery,

    /// Every query was dropped from scoring; a zero score would corrupt
    /// best-checkpoint tracking so this is reported instead.
    #[error("No valid query among {total}: every query lacks a matching gallery identity")]
    NoValidQueries { total: usize },

    #[error("Adaptive smoothing requires the model to produce an epsilon value")]
    MissingEpsilon,

    #[error("Label {label} is out of range for {classes} classes")]
    LabelOutOfRange { label: i64, classes: usize },

    #[error("Checkpoint error: {message} (path: {path:?})")]
    Checkpoint { message: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Operator abort observed during training; an emergency checkpoint for
    /// `epoch` has already been flushed.
    #[error("Training interrupted at epoch {epoch}")]
    Interrupted { epoch: usize },
}

impl ReidError {
    pub fn checkpoint<S: Into<String>>(msg: S, path: impl Into<PathBuf>) -> Self {
        ReidError::Checkpoint { message: msg.into(), path: path.into() }
    }

    pub fn length_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        ReidError::LengthMismatch { what, expected, actual }
    }
}

/// Errors produced when loading or validating a [`TrainConfig`].
///
/// [`TrainConfig`]: crate::train::TrainConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Cannot read config file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path:?}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

//! Error taxonomy for the detection engine

use std::path::PathBuf;

use thiserror::Error;

/// Why a model artifact could not become a usable handle.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to load model from {}: {source:#}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Failures surfaced to a single `detect` caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model not loaded")]
    NotLoaded,

    #[error("failed to decode image: {0:#}")]
    Decode(#[source] anyhow::Error),

    #[error("inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

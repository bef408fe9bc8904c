use thiserror::Error;

/// Errors raised by the pipeline stages. A stage that returns an
/// error leaves the dataset exactly as it was.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// malformed or missing identifiers, filters matching nothing
    #[error("data error: {0}")]
    Data(String),

    /// requested component, dimension or neighbour count out of range
    #[error("dimension error: {0}")]
    Dimension(String),

    /// no genes selected or surviving a threshold
    #[error("insufficient features: {0}")]
    InsufficientFeatures(String),

    /// a stage invoked before its required predecessor
    #[error("ordering error: {0}")]
    Ordering(String),

    /// the stored neighbour graph does not fit the requested clustering
    #[error("graph mismatch: {0}")]
    GraphMismatch(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

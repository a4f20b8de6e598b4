use std::path::PathBuf;
use thiserror::Error;

/// Statistics that have no value for the given input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedStatistic {
    #[error("initial energy is zero, relative error is undefined")]
    ZeroInitialEnergy,

    #[error("initial energy is not finite, relative error is undefined")]
    NonFiniteInitialEnergy,

    #[error("series is empty")]
    EmptySeries,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Source file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Undefined statistic: {0}")]
    Undefined(#[from] UndefinedStatistic),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AnalysisError {
    /// Maps an open/read failure, turning `NotFound` into `MissingFile`.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            AnalysisError::MissingFile(path)
        } else {
            AnalysisError::Io { path, source }
        }
    }
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

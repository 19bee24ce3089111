use burrow_core::StorageError;
use thiserror::Error;

/// Errors returned by link id generators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

impl From<GeneratorError> for StorageError {
    fn from(value: GeneratorError) -> Self {
        StorageError::Generation(value.to_string())
    }
}

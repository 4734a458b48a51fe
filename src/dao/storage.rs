use std::error::Error;
use thiserror::Error;

/// Result alias for queue storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by queue storage backends regardless of the underlying store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("queue storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("corrupt queue data: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

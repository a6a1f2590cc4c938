//! Application error types for Olympus services.

use thiserror::Error;

/// Main application error type used across all Olympus services.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (test data, cached artifact)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Redis error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Distributed lock could not be acquired or released
    #[error("Lock error: {0}")]
    LockError(String),

    /// Work queue or reply channel failure
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// File I/O error
    #[error("File error: {0}")]
    FileError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Returns the error code string for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::CacheError(_) => "CACHE_ERROR",
            AppError::LockError(_) => "LOCK_ERROR",
            AppError::QueueError(_) => "QUEUE_ERROR",
            AppError::SerializationError(_) => "SERIALIZATION_ERROR",
            AppError::FileError(_) => "FILE_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for AppError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        AppError::CacheError(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        AppError::CacheError(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for AppError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for AppError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::FileError(e.to_string())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::NotFound("x".into()).error_code(), "NOT_FOUND");
        assert_eq!(AppError::LockError("x".into()).error_code(), "LOCK_ERROR");
    }

    #[test]
    fn test_io_error_maps_to_file_error() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, AppError::FileError(_)));
    }
}

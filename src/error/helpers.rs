use super::{BatchError, ErrorCode};
use std::path::Path;

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert any error into a storage error carrying it as source
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, BatchError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, BatchError> {
        self.map_err(|e| BatchError::storage(message).with_source(e))
    }
}

/// Helper functions for common error scenarios
pub mod common {
    use super::*;

    /// Configuration file that does not exist
    pub fn config_not_found(path: impl AsRef<Path>) -> BatchError {
        BatchError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("Configuration file does not exist: {}", path.as_ref().display()),
            Some(path.as_ref().to_path_buf()),
        )
    }

    /// Invalid configuration value
    pub fn invalid_value(field: &str, reason: impl std::fmt::Display) -> BatchError {
        BatchError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("invalid value for '{}': {}", field, reason),
            None,
        )
    }

    /// Column template missing for an extract procedure
    pub fn template_missing(procedure: &str) -> BatchError {
        BatchError::setup_with_code(
            ErrorCode::SETUP_TEMPLATE_MISSING,
            format!("missing template for procedure {}", procedure),
            Some(procedure.to_string()),
        )
    }

    /// Statement preparation failure
    pub fn prepare_failed(key: &str, reason: impl std::fmt::Display) -> BatchError {
        BatchError::setup_with_code(
            ErrorCode::SETUP_PREPARE_FAILED,
            format!("failed to prepare statement for {}: {}", key, reason),
            Some(key.to_string()),
        )
    }

    /// File-level storage failure with the offending path attached
    pub fn storage_io(path: impl AsRef<Path>, operation: &str, err: std::io::Error) -> BatchError {
        BatchError::storage_with_code(
            ErrorCode::STORAGE_IO_ERROR,
            format!("{} failed for {}", operation, path.as_ref().display()),
            Some(path.as_ref().to_path_buf()),
        )
        .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_storage_error_keeps_source() {
        let flushed: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full"));
        let err = flushed.to_storage_error("failed to flush summary").unwrap_err();
        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(err.to_string().contains("failed to flush summary"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_prepare_failed_code() {
        let err = common::prepare_failed("PKG.LOAD_ACCT", "invalid identifier");
        assert_eq!(err.code(), ErrorCode::SETUP_PREPARE_FAILED);
        assert!(err.to_string().contains("PKG.LOAD_ACCT"));
    }
}

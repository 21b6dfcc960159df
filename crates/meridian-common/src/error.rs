//! Error types for MeridianDB.

use thiserror::Error;

/// Result type alias using MeridianError.
pub type Result<T> = std::result::Result<T, MeridianError>;

/// Errors that can occur in MeridianDB operations.
#[derive(Debug, Error)]
pub enum MeridianError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Relation page full, unable to append record")]
    PageFull,

    // Index lifecycle errors
    #[error("Index metadata mismatch: {0}")]
    BadIndexInfo(String),

    // Scan errors
    #[error("Bad scan operator: lower must be GT/GTE, upper must be LT/LTE")]
    BadOperator,

    #[error("Bad scan range: lower bound exceeds upper bound")]
    BadRange,

    #[error("No key in the index satisfies the scan criteria")]
    NoSuchKey,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan has returned all matching entries")]
    IndexScanCompleted,

    // Type errors
    #[error("Key type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // Internal errors
    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: MeridianError = io_err.into();
        assert!(matches!(err, MeridianError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = MeridianError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = MeridianError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_bad_index_info_display() {
        let err = MeridianError::BadIndexInfo("relation name differs".to_string());
        assert_eq!(
            err.to_string(),
            "Index metadata mismatch: relation name differs"
        );
    }

    #[test]
    fn test_scan_errors_display() {
        assert_eq!(
            MeridianError::BadOperator.to_string(),
            "Bad scan operator: lower must be GT/GTE, upper must be LT/LTE"
        );
        assert_eq!(
            MeridianError::BadRange.to_string(),
            "Bad scan range: lower bound exceeds upper bound"
        );
        assert_eq!(
            MeridianError::NoSuchKey.to_string(),
            "No key in the index satisfies the scan criteria"
        );
        assert_eq!(
            MeridianError::ScanNotInitialized.to_string(),
            "No scan has been initialized"
        );
        assert_eq!(
            MeridianError::IndexScanCompleted.to_string(),
            "Index scan has returned all matching entries"
        );
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = MeridianError::TypeMismatch {
            expected: "INT".to_string(),
            actual: "DOUBLE".to_string(),
        };
        assert_eq!(err.to_string(), "Key type mismatch: expected INT, got DOUBLE");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = MeridianError::TreeCorrupted("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: leaf chain broken");
    }

    #[test]
    fn test_internal_error_display() {
        let err = MeridianError::Internal("assertion failed".to_string());
        assert_eq!(err.to_string(), "Internal error: assertion failed");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(MeridianError::NoSuchKey)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MeridianError>();
    }
}

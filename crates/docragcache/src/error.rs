//! Error types for docragcache

use std::fmt;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures surfaced by [`crate::DocumentCacheStore`]
#[derive(Debug)]
pub enum CacheError {
    /// The store could not be opened, or is not open
    StoreUnavailable(docragdb::Error),

    /// A batch is larger than the configured total size
    QuotaExceeded {
        /// Serialized size of the rejected batch
        size: u64,
        /// Configured limit
        max: u64,
    },

    /// A transaction aborted; retrying the whole operation is safe
    TransactionFailed(docragdb::Error),
}

impl CacheError {
    /// Whether retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::TransactionFailed(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::StoreUnavailable(e) => write!(f, "Document store unavailable: {}", e),
            CacheError::QuotaExceeded { size, max } => write!(
                f,
                "Batch size {:.2} MB exceeds cache limit {:.2} MB",
                *size as f64 / 1024.0 / 1024.0,
                *max as f64 / 1024.0 / 1024.0
            ),
            CacheError::TransactionFailed(e) => write!(f, "Transaction failed: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::StoreUnavailable(e) | CacheError::TransactionFailed(e) => Some(e),
            CacheError::QuotaExceeded { .. } => None,
        }
    }
}

impl From<docragdb::Error> for CacheError {
    fn from(err: docragdb::Error) -> Self {
        match err {
            docragdb::Error::Closed => CacheError::StoreUnavailable(err),
            other => CacheError::TransactionFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        assert!(matches!(
            CacheError::from(docragdb::Error::Closed),
            CacheError::StoreUnavailable(_)
        ));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = CacheError::from(docragdb::Error::Io(io));
        assert!(matches!(err, CacheError::TransactionFailed(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_quota_message() {
        let err = CacheError::QuotaExceeded {
            size: 60 * 1024 * 1024,
            max: 50 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "Batch size 60.00 MB exceeds cache limit 50.00 MB"
        );
        assert!(!err.is_retryable());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured, business-agnostic error codes for the audit pipeline.
///
/// Every error kind named in the pipeline's contract (validation failures,
/// queue/circuit/pool conditions, integrity mismatches, export failures) maps
/// onto one of these variants so that callers classify errors by code rather
/// than by matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // General System Errors (1000-1999)
    InternalServerError = 1000,
    ConfigurationError = 1001,
    ServiceUnavailable = 1002,
    Timeout = 1003,
    ResourceExhausted = 1004,

    // Database Errors (2000-2999)
    DatabaseConnectionError = 2000,
    DatabaseConstraintViolation = 2001,
    DatabaseTransactionError = 2002,
    DatabaseQueryError = 2003,

    // Network & Transport Errors (3000-3999)
    NetworkTimeout = 3001,
    NetworkConnectionRefused = 3002,
    RetryableTransport = 3003,
    SerializationError = 3004,

    // Input Validation Errors (5000-5999)
    ValidationFailed = 5000,
    InvalidInput = 5001,
    MissingRequiredField = 5002,
    InvalidFormat = 5003,
    ValueOutOfRange = 5004,

    // Resource Management Errors (6000-6999)
    ResourceNotFound = 6000,
    ResourceAlreadyExists = 6001,
    NotFound = 6005,
    NotImplemented = 6006,

    // Cache & Storage Errors (8000-8999)
    CacheError = 8000,
    CacheMiss = 8001,
    StorageError = 8002,
    EncryptionError = 8003,
    DecryptionError = 8004,
    PoolExhausted = 8005,
    IntegrityFailure = 8006,

    // Queue / Processor Errors (9000-9999)
    QueueUnavailable = 9000,
    JobExecutionFailed = 9001,
    JobTimeout = 9002,
    JobDeserializationError = 9003,
    CircuitOpen = 9004,
    PermanentHandlerFailure = 9005,
    DeadLetterCapacityExceeded = 9006,

    // Compliance / Export Errors (10000-10999)
    ExportEncodingFailed = 10000,
    ReportGenerationFailed = 10001,
}

impl ErrorCode {
    /// Error category used for metrics labels and log grouping.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout
            | ErrorCode::ResourceExhausted => "system",

            ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseConstraintViolation
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::DatabaseQueryError => "database",

            ErrorCode::NetworkTimeout
            | ErrorCode::NetworkConnectionRefused
            | ErrorCode::RetryableTransport
            | ErrorCode::SerializationError => "network",

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange => "validation",

            ErrorCode::ResourceNotFound | ErrorCode::ResourceAlreadyExists => "resource",

            ErrorCode::CacheError
            | ErrorCode::CacheMiss
            | ErrorCode::StorageError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError
            | ErrorCode::PoolExhausted
            | ErrorCode::IntegrityFailure => "storage",

            ErrorCode::QueueUnavailable
            | ErrorCode::JobExecutionFailed
            | ErrorCode::JobTimeout
            | ErrorCode::JobDeserializationError
            | ErrorCode::CircuitOpen
            | ErrorCode::PermanentHandlerFailure
            | ErrorCode::DeadLetterCapacityExceeded => "queue",

            ErrorCode::ExportEncodingFailed | ErrorCode::ReportGenerationFailed => "compliance",

            ErrorCode::NotFound => "resource",
            ErrorCode::NotImplemented => "system",
        }
    }

    /// Whether the retry engine (C4) should consider this kind transient.
    ///
    /// `CircuitOpen` is deliberately excluded: a rejected call is distinct
    /// from a transient upstream failure and must not be counted against a
    /// retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkTimeout
                | ErrorCode::NetworkConnectionRefused
                | ErrorCode::RetryableTransport
                | ErrorCode::ServiceUnavailable
                | ErrorCode::DatabaseConnectionError
                | ErrorCode::CacheError
                | ErrorCode::JobTimeout
                | ErrorCode::ResourceExhausted
                | ErrorCode::PoolExhausted
                | ErrorCode::QueueUnavailable
        )
    }

    pub fn should_log_as_error(&self) -> bool {
        !matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::InvalidInput
                | ErrorCode::MissingRequiredField
                | ErrorCode::InvalidFormat
                | ErrorCode::ValueOutOfRange
                | ErrorCode::ResourceNotFound
                | ErrorCode::CircuitOpen
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_is_not_retryable() {
        assert!(!ErrorCode::CircuitOpen.is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(ErrorCode::NetworkTimeout.is_retryable());
        assert!(ErrorCode::PoolExhausted.is_retryable());
    }

    #[test]
    fn integrity_failure_category_is_storage() {
        assert_eq!(ErrorCode::IntegrityFailure.category(), "storage");
    }
}

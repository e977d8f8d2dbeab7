use super::codes::ErrorCode;
use super::context::ErrorContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How urgently an error should draw operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Coarse-grained grouping used for metrics labels; mirrors `ErrorCode::category`.
pub type ErrorCategory = &'static str;

/// The audit pipeline's single error type.
///
/// Carries a structured `code`, a human-readable `message`, optional
/// `details`, accumulated `context`, a `severity`, and an optional boxed
/// `cause` for chaining. `cause` is intentionally excluded from `Serialize`
/// to avoid unbounded recursion when errors are logged as JSON.
#[derive(Debug)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    pub context: ErrorContext,
    pub severity: ErrorSeverity,
    pub cause: Option<Box<Error>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Error", 5)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("details", &self.details)?;
        state.serialize_field("context", &self.context)?;
        state.serialize_field("severity", &self.severity)?;
        state.end()
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let severity = if code.should_log_as_error() {
            ErrorSeverity::Error
        } else {
            ErrorSeverity::Warning
        };
        Self {
            code,
            message: message.into(),
            details: None,
            context: ErrorContext::default(),
            severity,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message).with_severity(ErrorSeverity::Critical)
    }

    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueueUnavailable, message)
    }

    pub fn circuit_open(breaker_name: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CircuitOpen,
            format!("circuit '{}' is open", breaker_name.into()),
        )
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PoolExhausted, message)
    }

    pub fn integrity_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IntegrityFailure, message).with_severity(ErrorSeverity::Critical)
    }

    pub fn permanent_handler_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermanentHandlerFailure, message)
    }

    pub fn export_encoding_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExportEncodingFailed, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_context(mut self, note: impl Into<String>) -> Self {
        self.context.add_trace(note);
        self
    }

    pub fn caused_by(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::PoolTimedOut => ErrorCode::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => ErrorCode::DatabaseConnectionError,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ErrorCode::DatabaseConstraintViolation
            }
            sqlx::Error::Database(_) => ErrorCode::DatabaseConstraintViolation,
            _ => ErrorCode::DatabaseQueryError,
        };
        Error::new(code, format!("database error: {}", err))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let code = if err.is_timeout() || err.is_connection_dropped() || err.is_io_error() {
            ErrorCode::QueueUnavailable
        } else {
            ErrorCode::CacheError
        };
        Error::new(code, format!("redis error: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorCode::JobDeserializationError, format!("serialization error: {}", err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::config(format!("configuration error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for Reelcast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobStatus;

pub type Result<T> = std::result::Result<T, ReelcastError>;

#[derive(Error, Debug)]
pub enum ReelcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl ReelcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReelcastError::InvalidInput(_) => 3,
            ReelcastError::NotFound(_) => 4,
            ReelcastError::Platform(PlatformError::Authentication(_)) => 2,
            ReelcastError::Config(_) => 2,
            ReelcastError::Platform(_) => 1,
            ReelcastError::Database(_) => 1,
            ReelcastError::InvalidTransition { .. } => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Failures reported by the publishing collaborators
///
/// Every variant maps onto a [`FailureKind`], which is the only thing the
/// worker loop looks at when deciding whether to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        /// Seconds the platform asked us to wait, when it said so
        retry_after: Option<u64>,
    },

    #[error("Remote server error: {0}")]
    Server(String),

    #[error("Unexpected platform error: {0}")]
    Unknown(String),
}

impl PlatformError {
    /// Shorthand for a rate-limit error without a platform-supplied wait
    pub fn rate_limit(message: impl Into<String>) -> Self {
        PlatformError::RateLimit {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PlatformError::Authentication(_) => FailureKind::Authentication,
            PlatformError::Validation(_) => FailureKind::Validation,
            PlatformError::Network(_) => FailureKind::Network,
            PlatformError::Timeout(_) => FailureKind::Timeout,
            PlatformError::RateLimit { .. } => FailureKind::RateLimit,
            PlatformError::Server(_) => FailureKind::Server,
            PlatformError::Unknown(_) => FailureKind::Unknown,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Classification of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    /// Operator asked for no further attempts
    Cancelled,
    Unknown,
}

impl FailureKind {
    /// Whether a later attempt with the same input may succeed
    ///
    /// Unknown failures are permanent so that unclassified conditions can
    /// never loop forever.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::RateLimit | FailureKind::Network | FailureKind::Timeout | FailureKind::Server
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Authentication => "authentication",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Server => "server",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = ReelcastError::InvalidInput("Empty media list".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_not_found() {
        let error = ReelcastError::NotFound("0190-abc".to_string());
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = ReelcastError::Platform(PlatformError::Authentication(
            "Token expired".to_string(),
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = ReelcastError::Config(ConfigError::MissingField("instagram".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let network = ReelcastError::Platform(PlatformError::Network("refused".to_string()));
        assert_eq!(network.exit_code(), 1);

        let db = ReelcastError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = ReelcastError::Platform(PlatformError::Validation(
            "Carousel needs at least 2 items".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: Content validation failed: Carousel needs at least 2 items"
        );

        let error = ReelcastError::InvalidTransition {
            job_id: "job-1".to_string(),
            from: JobStatus::Success,
            to: JobStatus::Pending,
        };
        assert_eq!(
            error.to_string(),
            "Invalid status transition for job job-1: SUCCESS -> PENDING"
        );
    }

    #[test]
    fn test_rate_limit_error_formatting() {
        let error = PlatformError::RateLimit {
            message: "Application request limit reached".to_string(),
            retry_after: Some(60),
        };
        assert_eq!(
            error.to_string(),
            "Rate limit exceeded: Application request limit reached"
        );
    }

    #[test]
    fn test_platform_error_kinds() {
        assert_eq!(
            PlatformError::Authentication("x".into()).kind(),
            FailureKind::Authentication
        );
        assert_eq!(PlatformError::Validation("x".into()).kind(), FailureKind::Validation);
        assert_eq!(PlatformError::Network("x".into()).kind(), FailureKind::Network);
        assert_eq!(PlatformError::Timeout("x".into()).kind(), FailureKind::Timeout);
        assert_eq!(PlatformError::rate_limit("x").kind(), FailureKind::RateLimit);
        assert_eq!(PlatformError::Server("x".into()).kind(), FailureKind::Server);
        assert_eq!(PlatformError::Unknown("x".into()).kind(), FailureKind::Unknown);
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("x".into()).is_transient());
        assert!(PlatformError::Timeout("x".into()).is_transient());
        assert!(PlatformError::Server("x".into()).is_transient());
        assert!(PlatformError::rate_limit("x").is_transient());

        assert!(!PlatformError::Authentication("x".into()).is_transient());
        assert!(!PlatformError::Validation("x".into()).is_transient());
        assert!(!PlatformError::Unknown("x".into()).is_transient());
        assert!(!FailureKind::Cancelled.is_transient());
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::RateLimit).unwrap();
        assert_eq!(json, r#""rate_limit""#);
        let kind: FailureKind = serde_json::from_str(r#""validation""#).unwrap();
        assert_eq!(kind, FailureKind::Validation);
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let platform_error = PlatformError::Network("test".to_string());
        let error: ReelcastError = platform_error.into();

        match error {
            ReelcastError::Platform(_) => {}
            _ => panic!("Expected ReelcastError::Platform"),
        }
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::Server("502 Bad Gateway".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}

//! Error types for Postflow

use thiserror::Error;
use uuid::Uuid;

use crate::types::{ContentStatus, Role};

pub type Result<T> = std::result::Result<T, PostflowError>;

#[derive(Error, Debug)]
pub enum PostflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid transition: role '{role}' cannot move content from '{from}' to '{to}'")]
    InvalidTransition {
        role: Role,
        from: ContentStatus,
        to: ContentStatus,
    },

    #[error("Content {content_id} must be approved before publishing (current status: '{status}')")]
    NotApproved {
        content_id: Uuid,
        status: ContentStatus,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PostflowError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostflowError::InvalidTransition { .. }
            | PostflowError::NotApproved { .. }
            | PostflowError::InvalidState(_)
            | PostflowError::NotFound(_)
            | PostflowError::InvalidInput(_) => 3,
            PostflowError::Config(_) => 2,
            PostflowError::Platform(_) => 1,
            PostflowError::Database(_) => 1,
        }
    }

    /// Caller-facing validation errors. These are never retried internally.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PostflowError::InvalidTransition { .. }
                | PostflowError::NotApproved { .. }
                | PostflowError::InvalidState(_)
                | PostflowError::NotFound(_)
                | PostflowError::InvalidInput(_)
        )
    }

    /// Check if an error is transient and the call should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            PostflowError::Platform(platform_error) => platform_error.is_transient(),
            _ => false,
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
    IoError(std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// HTTP statuses a platform may answer with that are worth another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl PlatformError {
    /// Network trouble, timeouts, rate limiting and 429/5xx answers are transient.
    /// Everything else, including an open circuit, fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Network(_) | PlatformError::Timeout(_) | PlatformError::RateLimit(_) => {
                true
            }
            PlatformError::Http { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            PlatformError::Authentication(_)
            | PlatformError::Validation(_)
            | PlatformError::Posting(_)
            | PlatformError::CircuitOpen(_)
            | PlatformError::NotImplemented(_) => false,
        }
    }
}

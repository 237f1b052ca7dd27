//! Error types for the membersync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    MembershipFile(#[from] MembershipFileError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Directory API errors
// ---------------------------------------------------------------------------

/// Errors from the group directory HTTP API.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// HTTP-level transport error (network, TLS, timeout).
    #[error("directory HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("directory API error (HTTP {status}): {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// API token is missing or was rejected.
    #[error("directory authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Retries were exhausted while the API kept answering 429.
    #[error("directory rate limit exceeded after {attempts} attempts")]
    RateLimited {
        attempts: u32,
    },

    /// The response body could not be decoded.
    #[error("directory response parse error: {0}")]
    ParseError(String),
}

impl DirectoryError {
    /// The human-readable message used when logging a failed operation.
    pub fn message(&self) -> String {
        match self {
            Self::ApiError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ApiError { status, .. } => *status == 429 || *status >= 500,
            Self::RateLimited { .. } => true,
            Self::AuthenticationFailed(_) | Self::ParseError(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Per-row errors raised while reconciling and planning. Each one rejects a
/// single membership row; the batch continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The organization name is not present in the group.
    #[error("org ID not found for org name \"{0}\" - check the name is correct")]
    OrgIdNotFound(String),

    /// The role label cannot be resolved to a role defined in the group.
    #[error("invalid value for role: \"{0}\"")]
    InvalidRole(String),

    /// The email address is malformed.
    #[error("invalid email address format: \"{0}\"")]
    InvalidEmail(String),

    /// A member referenced by a removal is no longer known to the snapshot.
    #[error("user ID not found for \"{0}\"")]
    UserIdNotFound(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Membership file errors
// ---------------------------------------------------------------------------

/// Errors from loading the desired-membership file.
#[derive(Debug, Error)]
pub enum MembershipFileError {
    /// The file does not exist.
    #[error("membership file not found: {0}")]
    FileNotFound(String),

    /// JSON parse error.
    #[error("membership file parse error at '{path}': {detail}")]
    ParseError {
        path: String,
        detail: String,
    },

    /// Generic I/O error.
    #[error("membership file I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Errors from the reconciliation run itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another run is already in progress on this engine.
    #[error("reconciliation already in progress (started at {started_at})")]
    AlreadyRunning {
        started_at: String,
    },
}

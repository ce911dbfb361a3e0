//! Error types and wire error codes for flowbridge

use thiserror::Error;

use crate::protocol::ErrorData;

/// Main error type for flowbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("file already exists: {path}")]
    FileNameConflict { path: String },

    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("health check did not succeed within {waited_ms}ms")]
    HealthCheckTimeout { waited_ms: u64 },

    #[error("failed to start process: {message}")]
    ProcessStartFailed { message: String },

    #[error("no available port in {min}-{max}")]
    NoAvailablePort { min: u16, max: u16 },

    #[error("restart limit of {limit} exceeded")]
    RestartLimitExceeded { limit: u32 },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stable code carried in the wire error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::FileNotFound { .. } => "FILE_NOT_FOUND",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::FileNameConflict { .. } => "FILE_NAME_CONFLICT",
            Self::InvalidPayload { .. } => "INVALID_PAYLOAD",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::HealthCheckTimeout { .. } => "HEALTH_CHECK_TIMEOUT",
            Self::ProcessStartFailed { .. } => "PROCESS_START_FAILED",
            Self::NoAvailablePort { .. } => "NO_AVAILABLE_PORT",
            Self::RestartLimitExceeded { .. } => "RESTART_LIMIT_EXCEEDED",
            Self::Internal { .. } | Self::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// Optional structured detail for the error envelope.
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Self::FileNotFound { path }
            | Self::FileRead { path, .. }
            | Self::FileWrite { path, .. }
            | Self::FileNameConflict { path } => Some(serde_json::json!({ "path": path })),
            Self::InvalidRequest { reason } | Self::PermissionDenied { reason } => {
                Some(serde_json::json!({ "reason": reason }))
            }
            Self::NoAvailablePort { min, max } => {
                Some(serde_json::json!({ "min": min, "max": max }))
            }
            _ => None,
        }
    }

    /// Convert into the wire error payload.
    pub fn to_error_data(&self) -> ErrorData {
        ErrorData {
            code: self.code().to_string(),
            message: self.to_string(),
            detail: self.detail(),
        }
    }

    pub fn invalid_payload(err: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            message: err.to_string(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for flowbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

//! Error type and result alias

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Convenience result alias used across the workspace
pub type AppResult<T> = Result<T, AppError>;

/// Application error with structured error code and details
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (ids, topics, context)
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add a detail entry to this error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    // ==================== Convenience constructors ====================

    /// Header, envelope or payload decode failure
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DecodeFailed, msg)
    }

    /// Message expired before dispatch
    pub fn expired(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Expired, msg)
    }

    /// Bus publish/subscribe failure
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Transport, msg)
    }

    /// Bus client not connected
    pub fn not_connected() -> Self {
        Self::new(ErrorCode::NotConnected)
    }

    /// Request timed out
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Timeout, msg)
    }

    /// Database operation failure
    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }

    /// Fleet manager HTTP failure
    pub fn fleet(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::FleetRequest, msg)
    }

    /// Remote order id could not be resolved
    pub fn resolve(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ResolveFailed, msg)
    }

    /// Domain-level rejection by a handler
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::HandlerRejected, msg)
    }

    /// Validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{r} not found")).with_detail("resource", r)
    }

    /// Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::decode(e.to_string())
    }
}

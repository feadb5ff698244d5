//! Unified error codes for the Flowline platform

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Codes are represented as u16 values for efficient serialization and
/// stable cross-process reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== General ====================
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Internal error
    InternalError = 9,

    // ==================== Protocol ====================
    /// Header or envelope decode failed
    DecodeFailed = 1001,
    /// Payload decode failed for a known message type
    PayloadDecodeFailed = 1002,
    /// Message expired before dispatch
    Expired = 1003,
    /// Message rejected by the routing filter
    Filtered = 1004,
    /// Unknown message type
    UnknownMessageType = 1005,

    // ==================== Transport ====================
    /// Bus publish or subscribe failed
    Transport = 2001,
    /// Bus client is not connected
    NotConnected = 2002,
    /// Request timed out
    Timeout = 2003,

    // ==================== Persistence ====================
    /// Database operation failed
    DatabaseError = 3001,

    // ==================== Fleet ====================
    /// Fleet manager HTTP call failed
    FleetRequest = 4001,
    /// Fleet manager returned a non-zero response code
    FleetResponse = 4002,
    /// Remote order id could not be resolved to a local order
    ResolveFailed = 4003,

    // ==================== Handler ====================
    /// Domain-level rejection by a message handler
    HandlerRejected = 5001,
}

impl ErrorCode {
    /// Default human-readable message for this code
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::DecodeFailed => "Decode failed",
            ErrorCode::PayloadDecodeFailed => "Payload decode failed",
            ErrorCode::Expired => "Message expired",
            ErrorCode::Filtered => "Message filtered",
            ErrorCode::UnknownMessageType => "Unknown message type",
            ErrorCode::Transport => "Transport failure",
            ErrorCode::NotConnected => "Bus client not connected",
            ErrorCode::Timeout => "Request timed out",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::FleetRequest => "Fleet request failed",
            ErrorCode::FleetResponse => "Fleet error response",
            ErrorCode::ResolveFailed => "Order id resolve failed",
            ErrorCode::HandlerRejected => "Rejected by handler",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u16)
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            9 => Ok(ErrorCode::InternalError),
            1001 => Ok(ErrorCode::DecodeFailed),
            1002 => Ok(ErrorCode::PayloadDecodeFailed),
            1003 => Ok(ErrorCode::Expired),
            1004 => Ok(ErrorCode::Filtered),
            1005 => Ok(ErrorCode::UnknownMessageType),
            2001 => Ok(ErrorCode::Transport),
            2002 => Ok(ErrorCode::NotConnected),
            2003 => Ok(ErrorCode::Timeout),
            3001 => Ok(ErrorCode::DatabaseError),
            4001 => Ok(ErrorCode::FleetRequest),
            4002 => Ok(ErrorCode::FleetResponse),
            4003 => Ok(ErrorCode::ResolveFailed),
            5001 => Ok(ErrorCode::HandlerRejected),
            _ => Err(format!("invalid error code: {value}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [
            ErrorCode::DecodeFailed,
            ErrorCode::Transport,
            ErrorCode::DatabaseError,
            ErrorCode::ResolveFailed,
        ] {
            let raw: u16 = code.into();
            assert_eq!(ErrorCode::try_from(raw).unwrap(), code);
        }
        assert!(ErrorCode::try_from(9999).is_err());
    }

    #[test]
    fn test_default_messages() {
        assert_eq!(ErrorCode::Expired.message(), "Message expired");
        assert_eq!(ErrorCode::NotConnected.message(), "Bus client not connected");
    }
}

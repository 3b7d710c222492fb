//! Domain-specific error types for the acquisition core.
//!
//! Internal fallible operations return `Result<T, WipryError>`. Only
//! [`ErrorCode`] crosses the public callback boundary; everything else
//! is reported through boolean results and logged.

use std::time::Duration;
use thiserror::Error;

// ── ErrorCode ────────────────────────────────────────────────────

/// Reason a connection attempt failed, delivered once through
/// [`Subscriber::on_failure`](crate::dispatch::Subscriber::on_failure).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unknown error.
    UnknownError = -1,
    /// The accessory could not be reached or stopped answering.
    UnableToCommunicateWithAccessory = -2,
    /// The authentication handshake was rejected.
    UnableToAuthenticateWithAccessory = -3,
    /// The attached accessory is not a supported model.
    UnsupportedAccessory = -4,
}

impl TryFrom<i32> for ErrorCode {
    type Error = WipryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ErrorCode::UnknownError),
            -2 => Ok(ErrorCode::UnableToCommunicateWithAccessory),
            -3 => Ok(ErrorCode::UnableToAuthenticateWithAccessory),
            -4 => Ok(ErrorCode::UnsupportedAccessory),
            _ => Err(WipryError::UnknownVariant {
                type_name: "ErrorCode",
                value: value as i64,
            }),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

// ── WipryError ───────────────────────────────────────────────────

/// The canonical error type for the acquisition core.
#[derive(Debug, Error)]
pub enum WipryError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: i64 },

    /// The accessory answered a control request with the wrong response.
    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    /// The accessory reported a product id this core does not drive.
    #[error("unsupported accessory: product id {0:#06x}")]
    UnsupportedAccessory(u16),

    /// The challenge response did not match the expected digest.
    #[error("authentication rejected by accessory")]
    AuthenticationFailed,

    // ── Frame Errors ─────────────────────────────────────────────
    /// Fewer bytes were available than a fixed-size structure needs.
    #[error("{structure} too short: {actual} < {expected}")]
    Truncated {
        structure: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A declared length does not agree with the bytes that follow it.
    #[error("{structure} length mismatch: declared {declared}, found {actual}")]
    LengthMismatch {
        structure: &'static str,
        declared: usize,
        actual: usize,
    },

    /// A frame header failed validation.
    #[error("invalid frame header: {0}")]
    InvalidHeader(&'static str),

    /// A payload is larger than its length field can describe.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// An operation requires an established connection.
    #[error("accessory is not connected")]
    NotConnected,

    /// A connection attempt is already in progress or established.
    #[error("connection already active")]
    AlreadyActive,

    // ── Stream Errors ────────────────────────────────────────────
    /// The zoom window does not fit inside the frame resolution.
    #[error("zoom window {start}+{width} exceeds resolution {resolution}")]
    ZoomOutOfRange {
        start: u32,
        width: u8,
        resolution: usize,
    },

    /// The data type is reserved and cannot be streamed.
    #[error("data type {0} is not streamable")]
    UnstreamableDataType(crate::message::DataType),

    /// The connected accessory does not advertise the data type.
    #[error("accessory does not support {0}")]
    UnsupportedDataType(crate::message::DataType),

    // ── Transport Errors ─────────────────────────────────────────
    /// The transport reported an I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Failed to spawn a worker thread.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl WipryError {
    /// Maps a handshake error onto the code reported to the subscriber.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            WipryError::UnsupportedAccessory(_) => ErrorCode::UnsupportedAccessory,
            WipryError::AuthenticationFailed => ErrorCode::UnableToAuthenticateWithAccessory,
            WipryError::Io(_)
            | WipryError::Timeout(_)
            | WipryError::UnexpectedResponse { .. }
            | WipryError::Truncated { .. } => ErrorCode::UnableToCommunicateWithAccessory,
            _ => ErrorCode::UnknownError,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for WipryError {
    fn from(s: String) -> Self {
        WipryError::Other(s)
    }
}

impl From<&str> for WipryError {
    fn from(s: &str) -> Self {
        WipryError::Other(s.to_string())
    }
}

//! Error module for chatrelay
//!
//! Error codes are grouped into protocol, notifier, broker, system and client
//! ranges. The numeric codes travel inside `Error` frames of the relay protocol.

use thiserror::Error;
use std::fmt;

use crate::notify::SubscriptionId;

/// Error code carried by relay `Error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Protocol errors (0x0001-0x0100)
    InvalidEventType = 0x0001,
    MalformedTlv = 0x0002,
    IncompleteMessage = 0x0003,
    FrameTooLarge = 0x0004,
    MissingField = 0x0005,

    // Notifier errors (0x0101-0x0200)
    UnknownSubscription = 0x0101,
    UndecodableBatch = 0x0102,

    // Broker errors (0x0201-0x0300)
    BrokerUnreachable = 0x0201,

    // System errors (0x0301-0x0400)
    InternalServerError = 0x0301,
    ConfigInvalid = 0x0302,

    // Client errors (0x0401-0x0500)
    ConnectionFailed = 0x0401,
    SendFailed = 0x0402,
    ReadFailed = 0x0403,
    WriteFailed = 0x0404,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Try to convert a u16 to an ErrorCode
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::InvalidEventType),
            0x0002 => Some(Self::MalformedTlv),
            0x0003 => Some(Self::IncompleteMessage),
            0x0004 => Some(Self::FrameTooLarge),
            0x0005 => Some(Self::MissingField),
            0x0101 => Some(Self::UnknownSubscription),
            0x0102 => Some(Self::UndecodableBatch),
            0x0201 => Some(Self::BrokerUnreachable),
            0x0301 => Some(Self::InternalServerError),
            0x0302 => Some(Self::ConfigInvalid),
            0x0401 => Some(Self::ConnectionFailed),
            0x0402 => Some(Self::SendFailed),
            0x0403 => Some(Self::ReadFailed),
            0x0404 => Some(Self::WriteFailed),
            _ => None,
        }
    }

    /// Get a human-readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidEventType => "Unknown or invalid event type",
            Self::MalformedTlv => "Malformed or inconsistent TLV field",
            Self::IncompleteMessage => "Incomplete or truncated message",
            Self::FrameTooLarge => "Frame exceeds the maximum frame size",
            Self::MissingField => "Required field missing from frame",
            Self::UnknownSubscription => "No live subscription with that id",
            Self::UndecodableBatch => "Notification batch could not be decoded",
            Self::BrokerUnreachable => "External broker is unreachable",
            Self::InternalServerError => "Unexpected server error",
            Self::ConfigInvalid => "Invalid configuration",
            Self::ConnectionFailed => "Failed to connect to server",
            Self::SendFailed => "Failed to send message",
            Self::ReadFailed => "Failed to read from connection",
            Self::WriteFailed => "Failed to write to connection",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidEventType => "INVALID_EVENT_TYPE",
            Self::MalformedTlv => "MALFORMED_TLV",
            Self::IncompleteMessage => "INCOMPLETE_MESSAGE",
            Self::FrameTooLarge => "FRAME_TOO_LARGE",
            Self::MissingField => "MISSING_FIELD",
            Self::UnknownSubscription => "UNKNOWN_SUBSCRIPTION",
            Self::UndecodableBatch => "UNDECODABLE_BATCH",
            Self::BrokerUnreachable => "BROKER_UNREACHABLE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::SendFailed => "SEND_FAILED",
            Self::ReadFailed => "READ_FAILED",
            Self::WriteFailed => "WRITE_FAILED",
        };
        write!(f, "{} (0x{:04X})", name, self.as_u16())
    }
}

/// Main error type for chatrelay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{code}: {message}")]
    Standard {
        code: ErrorCode,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl RelayError {
    /// Create a new standard error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard {
            code,
            message: message.into(),
        }
    }

    /// Get the error code, if one applies
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Standard { code, .. } => Some(*code),
            Self::Notify(e) => Some(e.code()),
            _ => None,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Standard { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }
}

/// Failures surfaced by a `Notifier` to its caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The id was never issued, or its subscription has already been removed.
    /// The target is no longer local; fall back to `publish`.
    #[error("no live subscription with id {0}")]
    UnknownSubscription(SubscriptionId),
}

impl NotifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownSubscription(_) => ErrorCode::UnknownSubscription,
        }
    }
}

/// Result type alias for chatrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

//! Error types for the FM radio network protocol.

use thiserror::Error;

/// Protocol-level errors that can occur during communication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in frame header.
    #[error("Invalid magic bytes: expected 'FMRP', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Message type is unknown or unsupported.
    #[error("Unknown message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Frame payload is too large.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    /// Frame payload is incomplete.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Message type is valid but not allowed in this direction.
    #[error("Unexpected message type: 0x{0:04X}")]
    UnexpectedMessageType(u16),

    /// Failed to decode message payload.
    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    /// Failed to encode message payload.
    #[error("Failed to encode message: {0}")]
    EncodeError(String),
}

/// Error code sent in [`ServerMessage::Error`](crate::ServerMessage::Error) responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Operation succeeded.
    Success = 0x0000,
    /// Unknown error occurred.
    Unknown = 0x0001,
    /// A request parameter is outside its contract (bad enum value, bad frequency).
    InvalidParameter = 0x0002,
    /// The client already has a wait outstanding for this event category.
    WaitOutstanding = 0x0003,
    /// The client id is not registered (never acquired or already released).
    UnknownClient = 0x0004,
    /// The notifier has been shut down.
    NotRunning = 0x0005,
    /// The wait was cancelled because its client session ended.
    Cancelled = 0x0006,
    /// The wait was cancelled because the server is shutting down.
    ShuttingDown = 0x0007,
    /// The tuner hardware rejected or failed the call.
    HardwareFailure = 0x0008,
    /// Protocol error.
    ProtocolError = 0x0009,
    /// Invalid session state (e.g. command before hello).
    InvalidState = 0x000A,
    /// No more client ids can be issued.
    ClientIdsExhausted = 0x000B,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ErrorCode::Success,
            0x0002 => ErrorCode::InvalidParameter,
            0x0003 => ErrorCode::WaitOutstanding,
            0x0004 => ErrorCode::UnknownClient,
            0x0005 => ErrorCode::NotRunning,
            0x0006 => ErrorCode::Cancelled,
            0x0007 => ErrorCode::ShuttingDown,
            0x0008 => ErrorCode::HardwareFailure,
            0x0009 => ErrorCode::ProtocolError,
            0x000A => ErrorCode::InvalidState,
            0x000B => ErrorCode::ClientIdsExhausted,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

impl ErrorCode {
    /// Returns true if this error code indicates success.
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }

    /// Returns true if this code reports a cancelled wait rather than a failure.
    pub fn is_cancellation(self) -> bool {
        matches!(self, ErrorCode::Cancelled | ErrorCode::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codes_collapse() {
        assert_eq!(ErrorCode::from(0x0001), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from(0x7777), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from(0x0006), ErrorCode::Cancelled);
    }

    #[test]
    fn test_cancellation_codes() {
        assert!(ErrorCode::Cancelled.is_cancellation());
        assert!(ErrorCode::ShuttingDown.is_cancellation());
        assert!(!ErrorCode::NotRunning.is_cancellation());
        assert!(ErrorCode::Success.is_success());
    }
}

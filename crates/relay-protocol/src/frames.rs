//! Frame types for the Relay protocol.
//!
//! Frames are the fundamental unit of communication. Each frame is
//! serialized using MessagePack; invocation arguments are carried as
//! JSON-representable values so that strings, integers, floats, booleans,
//! and null all round-trip losslessly.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Invocation = 0x01,
    Error = 0x02,
    Connected = 0x03,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Invocation),
            0x02 => Ok(FrameType::Error),
            0x03 => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes carried by `Frame::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    /// Payload could not be parsed into a call name plus argument list.
    MalformedPayload = 1001,
    /// No handler registered for the call name.
    UnknownMethod = 1002,
    /// Argument count or kind does not match the handler's declared shape.
    ArgumentMismatch = 1003,
    /// The handler itself failed.
    HandlerError = 1004,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1001 => Ok(ErrorCode::MalformedPayload),
            1002 => Ok(ErrorCode::UnknownMethod),
            1003 => Ok(ErrorCode::ArgumentMismatch),
            1004 => Ok(ErrorCode::HandlerError),
            _ => Err("Invalid error code"),
        }
    }
}

/// A protocol frame.
///
/// Frames are the messages exchanged between clients and servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// A named remote call with an ordered argument list.
    ///
    /// Sent client-to-server to invoke a registered handler, and
    /// server-to-client when the hub broadcasts.
    #[serde(rename = "invocation")]
    Invocation {
        /// Call name, case-sensitive.
        target: String,
        /// Ordered, dynamically typed arguments.
        args: Vec<serde_json::Value>,
    },

    /// Error response, delivered only to the sender of the failing frame.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },

    /// Handshake notice sent once when a connection is accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier assigned by the server.
        connection_id: String,
        /// Negotiated protocol version (major).
        version: u8,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Invocation { .. } => FrameType::Invocation,
            Frame::Error { .. } => FrameType::Error,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a new Invocation frame.
    #[must_use]
    pub fn invocation(target: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Frame::Invocation {
            target: target.into(),
            args,
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let invocation = Frame::invocation("SendMessage", vec![json!("alice")]);
        assert_eq!(invocation.frame_type(), FrameType::Invocation);

        let error = Frame::error(ErrorCode::UnknownMethod, "no such method");
        assert_eq!(error.frame_type(), FrameType::Error);
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::try_from(1001), Ok(ErrorCode::MalformedPayload));
        assert_eq!(ErrorCode::try_from(1002), Ok(ErrorCode::UnknownMethod));
        assert_eq!(ErrorCode::try_from(1003), Ok(ErrorCode::ArgumentMismatch));
        assert_eq!(ErrorCode::try_from(1004), Ok(ErrorCode::HandlerError));
        assert!(ErrorCode::try_from(1005).is_err());
    }
}

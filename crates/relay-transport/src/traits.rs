//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations
//! must provide, keeping the hub core transport-agnostic. Connection
//! identity is assigned by the registry at accept time, not by the
//! transport.

use async_trait::async_trait;
use bytes::Bytes;
use relay_protocol::Frame;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] relay_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can accept connections.
///
/// Transports are responsible for handling the underlying protocol and
/// providing a uniform interface over it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An active connection over a transport.
///
/// Connections handle the bidirectional flow of frames between the hub
/// and a single client.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send raw bytes to the connection.
    ///
    /// This is useful for pre-encoded frames to avoid re-encoding;
    /// broadcast fan-out encodes once and sends the same bytes everywhere.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

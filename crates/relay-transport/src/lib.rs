//! # relay-transport
//!
//! Transport boundary for the Relay broadcast hub.
//!
//! The hub core is transport-agnostic: it consumes accepted connections,
//! receives raw payloads from them, and hands payloads back for sending.
//! This crate defines that boundary as traits and provides a WebSocket
//! implementation.
//!
//! ```rust,ignore
//! use relay_transport::{Connection, Transport};
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Decode and dispatch
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

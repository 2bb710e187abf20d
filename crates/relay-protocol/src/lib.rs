//! # relay-protocol
//!
//! Wire protocol definitions for the Relay broadcast hub.
//!
//! This crate defines the binary protocol exchanged between Relay clients
//! and servers: frame types, the length-prefixed codec, and versioning.
//!
//! ## Frame Types
//!
//! - `Invocation` - A named remote call with an ordered argument list
//! - `Error` - Error report sent back to the offending sender
//! - `Connected` - Handshake notice carrying the assigned connection id
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{Frame, codec};
//! use serde_json::json;
//!
//! let frame = Frame::invocation("SendMessage", vec![json!("alice"), json!("hi")]);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ErrorCode, Frame};
pub use version::{Version, PROTOCOL_VERSION};

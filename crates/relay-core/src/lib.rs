//! # relay-core
//!
//! Connection tracking and broadcast fan-out for the Relay hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Tracks every currently open connection and its outbound queue
//! - **Dispatcher** - Decodes inbound payloads into named invocations and routes
//!   them to registered handlers
//! - **Hub** - Fans an invocation out to every open connection, independently
//!   per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  Dispatcher │────▶│     Hub     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │  Registry   │
//!                                         └─────────────┘
//! ```
//!
//! Delivery is best-effort and fire-and-forget: there are no
//! acknowledgements, receipts, or retries. A message dropped by a dying
//! connection is simply lost, and that connection is unregistered.

pub mod dispatch;
pub mod hub;
pub mod registry;

pub use dispatch::{DispatchError, Dispatcher, DispatcherBuilder, HandlerError, ParamKind};
pub use hub::Hub;
pub use registry::{ConnectionId, Registry};

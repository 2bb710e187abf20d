//! Invocation dispatch for Relay.
//!
//! The dispatcher decodes an inbound payload into a named call plus
//! arguments, validates the arguments against the handler's declared
//! parameter shape, and invokes the one registered handler. All failures
//! are connection-local: they are reported to the sender and never affect
//! other connections or crash the process.

use crate::registry::ConnectionId;
use relay_protocol::{codec, ErrorCode, Frame, ProtocolError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Dispatch errors, reported to the sending connection only.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload could not be parsed into a call name plus arguments.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] ProtocolError),

    /// No handler is registered for the call name.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The arguments do not match the handler's declared shape.
    #[error("Argument mismatch for {target}: {detail}")]
    ArgumentMismatch {
        /// Call name.
        target: String,
        /// What was violated.
        detail: String,
    },

    /// The handler itself failed.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Wire error code for reporting this failure back to the sender.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::MalformedPayload(_) => ErrorCode::MalformedPayload,
            DispatchError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            DispatchError::ArgumentMismatch { .. } => ErrorCode::ArgumentMismatch,
            DispatchError::Handler(_) => ErrorCode::HandlerError,
        }
    }
}

/// Failure raised by a handler, contained at the dispatch boundary.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a new handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Declared kind of one handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A string argument.
    String,
    /// An integer argument.
    Integer,
    /// A floating point argument (integers are accepted and widen).
    Float,
    /// A boolean argument.
    Boolean,
    /// Any argument, including null.
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Any => true,
        }
    }
}

/// A registered handler function.
///
/// Handlers receive the source connection id as implicit context so they
/// can address the hub (typically captured by the closure).
pub type HandlerFn = Arc<dyn Fn(ConnectionId, &[Value]) -> Result<(), HandlerError> + Send + Sync>;

struct Registration {
    params: Vec<ParamKind>,
    handler: HandlerFn,
}

/// Error returned when two handlers are registered under one call name.
#[derive(Debug, Error)]
#[error("Handler already registered for {0}")]
pub struct DuplicateHandler(pub String);

/// Builder assembling the handler table at startup.
///
/// The table is immutable once built; there is at most one handler per
/// call name.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Registration>,
}

impl DispatcherBuilder {
    /// Register a handler for a call name with its declared parameter shape.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already registered for the name.
    pub fn handle<F>(
        mut self,
        name: impl Into<String>,
        params: &[ParamKind],
        handler: F,
    ) -> Result<Self, DuplicateHandler>
    where
        F: Fn(ConnectionId, &[Value]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(DuplicateHandler(name));
        }
        self.handlers.insert(
            name,
            Registration {
                params: params.to_vec(),
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        debug!(handlers = self.handlers.len(), "Dispatcher built");
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Routes decoded invocations to their registered handlers.
pub struct Dispatcher {
    handlers: HashMap<String, Registration>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Names of all registered call targets.
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Decode a raw payload into a call name and argument list.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if the payload cannot be parsed or is
    /// not an invocation frame.
    pub fn decode(data: &[u8]) -> Result<(String, Vec<Value>), DispatchError> {
        match codec::decode(data)? {
            Frame::Invocation { target, args } => Ok((target, args)),
            other => Err(DispatchError::MalformedPayload(ProtocolError::Invalid(
                format!("expected invocation frame, got {:?}", other.frame_type()),
            ))),
        }
    }

    /// Dispatch a decoded invocation from `source`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMethod` for an unregistered name,
    /// `ArgumentMismatch` when the arguments violate the declared shape,
    /// and `Handler` when the handler itself fails. All are reported to
    /// the caller only; other connections observe nothing.
    pub fn dispatch(
        &self,
        target: &str,
        args: &[Value],
        source: ConnectionId,
    ) -> Result<(), DispatchError> {
        let registration = self
            .handlers
            .get(target)
            .ok_or_else(|| DispatchError::UnknownMethod(target.to_string()))?;

        if args.len() != registration.params.len() {
            return Err(DispatchError::ArgumentMismatch {
                target: target.to_string(),
                detail: format!(
                    "expected {} arguments, got {}",
                    registration.params.len(),
                    args.len()
                ),
            });
        }

        for (position, (kind, value)) in registration.params.iter().zip(args).enumerate() {
            if !kind.matches(value) {
                return Err(DispatchError::ArgumentMismatch {
                    target: target.to_string(),
                    detail: format!("argument {position} is not {kind:?}"),
                });
            }
        }

        debug!(connection = %source, target = %target, "Dispatching invocation");

        (registration.handler)(source, args).map_err(|e| {
            warn!(connection = %source, target = %target, error = %e, "Handler failed");
            DispatchError::Handler(e)
        })
    }

    /// Decode a raw payload and dispatch it in one step.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::decode`] and [`Dispatcher::dispatch`].
    pub fn dispatch_payload(&self, data: &[u8], source: ConnectionId) -> Result<(), DispatchError> {
        let (target, args) = Self::decode(data)?;
        self.dispatch(&target, &args, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn source_id() -> ConnectionId {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(tx)
    }

    fn chat_dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
        Dispatcher::builder()
            .handle(
                "SendMessage",
                &[ParamKind::String, ParamKind::String],
                move |_source, _args| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap()
            .build()
    }

    #[test]
    fn test_dispatch_invokes_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = chat_dispatcher(calls.clone());

        dispatcher
            .dispatch("SendMessage", &[json!("alice"), json!("hi")], source_id())
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_unknown_method() {
        let dispatcher = chat_dispatcher(Arc::new(AtomicUsize::new(0)));

        let err = dispatcher
            .dispatch("NoSuchMethod", &[], source_id())
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMethod(_)));
        assert_eq!(err.code(), ErrorCode::UnknownMethod);
    }

    #[test]
    fn test_dispatch_argument_mismatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = chat_dispatcher(calls.clone());

        // Wrong arity
        let err = dispatcher
            .dispatch("SendMessage", &[json!("alice")], source_id())
            .unwrap_err();
        assert!(matches!(err, DispatchError::ArgumentMismatch { .. }));

        // Wrong kind
        let err = dispatcher
            .dispatch("SendMessage", &[json!("alice"), json!(42)], source_id())
            .unwrap_err();
        assert!(matches!(err, DispatchError::ArgumentMismatch { .. }));
        assert_eq!(err.code(), ErrorCode::ArgumentMismatch);

        // Handler never ran
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_param_kind_matching() {
        assert!(ParamKind::String.matches(&json!("s")));
        assert!(!ParamKind::String.matches(&json!(null)));
        assert!(ParamKind::Integer.matches(&json!(7)));
        assert!(!ParamKind::Integer.matches(&json!(7.5)));
        assert!(ParamKind::Float.matches(&json!(7.5)));
        // Integers widen to float
        assert!(ParamKind::Float.matches(&json!(7)));
        assert!(ParamKind::Boolean.matches(&json!(true)));
        assert!(ParamKind::Any.matches(&json!(null)));
    }

    #[test]
    fn test_handler_error_contained() {
        let dispatcher = Dispatcher::builder()
            .handle("Explode", &[], |_source, _args| {
                Err(HandlerError::new("boom"))
            })
            .unwrap()
            .build();

        let err = dispatcher.dispatch("Explode", &[], source_id()).unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert_eq!(err.code(), ErrorCode::HandlerError);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = Dispatcher::builder()
            .handle("SendMessage", &[], |_, _| Ok(()))
            .unwrap()
            .handle("SendMessage", &[], |_, _| Ok(()));

        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_non_invocation() {
        let frame = Frame::connected("conn-1", 1);
        let encoded = codec::encode(&frame).unwrap();

        let err = Dispatcher::decode(&encoded).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedPayload(_)));
        assert_eq!(err.code(), ErrorCode::MalformedPayload);
    }

    #[test]
    fn test_dispatch_payload_roundtrip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = chat_dispatcher(calls.clone());

        let frame = Frame::invocation("SendMessage", vec![json!("alice"), json!("hi")]);
        let encoded = codec::encode(&frame).unwrap();

        dispatcher.dispatch_payload(&encoded, source_id()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(dispatcher.dispatch_payload(b"garbage", source_id()).is_err());
    }
}

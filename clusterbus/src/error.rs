//! Error types for clusterbus.
//!
//! Registration errors are returned synchronously to the caller. Failures
//! raised by listeners and handlers during dispatch never surface through
//! `fire`; they are wrapped in a [`CallbackFailure`] and handed to the bus's
//! [`ErrorSink`].

use crate::key::EventTag;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// A bind or register call was given a malformed key or event type.
    ///
    /// Registry state is left unchanged when this is returned.
    #[error("Invalid registration: {reason}")]
    InvalidRegistration {
        /// Why the registration was rejected.
        reason: String,
    },

    /// The event bus is shutting down and cannot process new events.
    #[error("Bus is shutting down")]
    ShuttingDown,

    /// The delivery executor refused a task.
    #[error("Executor rejected task: {reason}")]
    ExecutorRejected {
        /// The reason given by the executor.
        reason: String,
    },

    /// Configuration error occurred.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// The configuration error message.
        message: String,
    },

    /// An internal error occurred that shouldn't happen under normal circumstances.
    #[error("Internal error: {message}")]
    Internal {
        /// The internal error message.
        message: String,
    },
}

/// Errors raised by a listener or handler callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The callback panicked during execution.
    #[error("Callback panicked: {message}")]
    Panic {
        /// The panic message.
        message: String,
    },

    /// The callback returned an error.
    #[error("Callback failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

/// Result type returned by listener and handler callbacks.
pub type CallbackResult = Result<(), HandlerError>;

/// Convenience type alias for EventBus operation results.
pub type EventBusResult<T> = Result<T, EventBusError>;

impl EventBusError {
    /// Creates a new invalid registration error.
    pub fn invalid_registration<S: Into<String>>(reason: S) -> Self {
        Self::InvalidRegistration {
            reason: reason.into(),
        }
    }

    /// Creates a new executor rejection error.
    pub fn executor_rejected<S: Into<String>>(reason: S) -> Self {
        Self::ExecutorRejected {
            reason: reason.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl HandlerError {
    /// Creates a new panic error.
    pub fn panic<S: Into<String>>(message: S) -> Self {
        Self::Panic {
            message: message.into(),
        }
    }

    /// Wraps any error returned by a callback.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Failed(error.into())
    }

    /// Builds a panic error from the payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panic { message }
    }

    /// Returns the wrapped error if it is of type `E`.
    ///
    /// Useful for error sinks that want to recognise errors such as
    /// [`ClusterCommandError`] without the bus interpreting them.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(error) => error.downcast_ref::<E>(),
            Self::Panic { .. } => None,
        }
    }
}

/// Identifies which registration produced a [`CallbackFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackRef {
    /// A type- or key-addressed listener.
    Listener(crate::listener::ListenerId),
    /// A catch-all handler.
    Handler(crate::handlers::HandlerId),
}

impl std::fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener(id) => write!(f, "{}", id),
            Self::Handler(id) => write!(f, "{}", id),
        }
    }
}

/// A callback raised an error while an event was being delivered.
#[derive(Debug, Error)]
#[error("{callback} ({name}) failed on {tag}: {error}")]
pub struct CallbackFailure {
    /// The registration whose callback failed.
    pub callback: CallbackRef,
    /// Diagnostic name of the callback.
    pub name: &'static str,
    /// Tag of the event being delivered.
    pub tag: EventTag,
    /// Whether the event arrived as a remote payload.
    pub remote: bool,
    /// What the callback raised.
    #[source]
    pub error: HandlerError,
}

/// Receives callback failures reported during dispatch.
pub trait ErrorSink: Send + Sync + 'static {
    /// Reports one failed delivery.
    fn report(&self, failure: CallbackFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(CallbackFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: CallbackFailure) {
        self(failure)
    }
}

/// Error sink that logs every failure at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, failure: CallbackFailure) {
        tracing::error!(
            callback = %failure.callback,
            name = failure.name,
            tag = %failure.tag,
            remote = failure.remote,
            error = %failure.error,
            "event callback failed"
        );
    }
}

/// Error sink that drops every failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardErrorSink;

impl ErrorSink for DiscardErrorSink {
    fn report(&self, _failure: CallbackFailure) {}
}

/// Error raised by cluster command processing.
///
/// A plain carrier of an optional message and an optional cause. The bus
/// never constructs or inspects it; when a callback returns one it travels
/// to the error sink inside [`HandlerError::Failed`] unchanged.
#[derive(Debug, Default)]
pub struct ClusterCommandError {
    message: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ClusterCommandError {
    /// Creates an error with neither message nor cause.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error carrying a message.
    pub fn with_message<S: Into<String>>(message: S) -> Self {
        Self {
            message: Some(message.into()),
            source: None,
        }
    }

    /// Creates an error caused by another error.
    pub fn with_cause<E>(cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            message: None,
            source: Some(cause.into()),
        }
    }

    /// Creates an error carrying both a message and a cause.
    pub fn with_message_and_cause<S, E>(message: S, cause: E) -> Self
    where
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            message: Some(message.into()),
            source: Some(cause.into()),
        }
    }

    /// Returns the message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl std::fmt::Display for ClusterCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.message, &self.source) {
            (Some(message), _) => write!(f, "cluster command failed: {}", message),
            (None, Some(cause)) => write!(f, "cluster command failed: {}", cause),
            (None, None) => f.write_str("cluster command failed"),
        }
    }
}

impl std::error::Error for ClusterCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}
